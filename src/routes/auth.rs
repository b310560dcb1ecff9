use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{invalidate_context, CurrentUser};
use crate::middleware::rate_limit::client_ip;
use crate::models::user::*;
use crate::services::{limits, mailer, provisioning, sessions, verification};
use crate::AppState;

const SIGNUP_RATE_MESSAGE: &str = "Too many signup attempts. Please try again later.";

/// Target for the post-signup verification page, with the email carried as a
/// query parameter. Addresses may contain `+` or `&`, so encode them.
fn verify_redirect(verify_url: &str, email: &str) -> String {
    format!("{}?email={}", verify_url, urlencoding::encode(email))
}

pub async fn organization_signup(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OrganizationSignupRequest>,
) -> AppResult<Json<Value>> {
    let ip = client_ip(&headers, Some(addr));
    let allowed = limits::check_signup_window(
        &state.cache,
        &ip,
        state.config.rate_limit.signup_max_attempts,
        state.config.rate_limit.signup_window_secs,
    )
    .await;
    if !allowed {
        return Err(AppError::RateLimited(SIGNUP_RATE_MESSAGE.into()));
    }

    let outcome = provisioning::create_organization_with_admin(&state, &body).await?;

    tracing::info!(
        organization_id = %outcome.organization_id,
        slug = %outcome.slug,
        "organization provisioned"
    );

    Ok(Json(json!({
        "status": "success",
        "message": "Organization created. Check your email for a verification code.",
        "organizationId": outcome.organization_id,
        "slug": outcome.slug,
        "redirectTo": verify_redirect(&state.config.org.verify_url, &body.admin_email),
    })))
}

pub async fn verify_organization_signup(
    State(state): State<AppState>,
    Json(body): Json<VerifySignupRequest>,
) -> AppResult<Response> {
    let user = verification::exchange(&state.db, &body.email, &body.code).await?;

    // Owners verifying their signup get an audit entry on the organization.
    if let (Some(org_id), Some(role)) = (user.organization_id, user.org_role()) {
        if role == crate::models::OrgRole::Owner {
            sqlx::query(
                "INSERT INTO organization_activities (id, organization_id, actor_id, action, metadata, created_at) VALUES ($1, $2, $3, $4, $5, NOW())",
            )
            .bind(Uuid::new_v4())
            .bind(org_id)
            .bind(user.id)
            .bind("organization.owner_verified")
            .bind(json!({ "email": user.email }))
            .execute(&state.db)
            .await?;
        }
    }

    // This path authenticates a user who never had a password or prior
    // session, so it mints one directly through the shared issuance service.
    let session = sessions::issue(&state.db, &state.config, user.id).await?;
    let cookie = sessions::session_cookie(&state.config, &session.token);

    let body = json!({
        "success": true,
        "message": "Email verified. You are now signed in.",
        "redirectTo": state.config.org.dashboard_url,
    });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

pub async fn github_sign_in(State(state): State<AppState>) -> AppResult<Redirect> {
    let github = state
        .github
        .as_ref()
        .ok_or_else(|| AppError::Internal("GitHub sign-in is not configured".into()))?;
    Ok(Redirect::temporary(&github.authorize_url()))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

pub async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    let github = state
        .github
        .as_ref()
        .ok_or_else(|| AppError::Internal("GitHub sign-in is not configured".into()))?;

    if !github.verify_state(&query.state) {
        return Err(AppError::Unauthorized("Invalid OAuth state".into()));
    }

    let access_token = github.exchange_code(&query.code).await?;
    let gh_user = github.fetch_user(&access_token).await?;
    let email = match gh_user.email.clone() {
        Some(email) => Some(email),
        None => github.fetch_primary_email(&access_token).await?,
    };
    let email = email
        .ok_or_else(|| AppError::BadRequest("GitHub account has no verified email".into()))?;
    let name = gh_user.name.clone().unwrap_or_else(|| gh_user.login.clone());

    // OAuth implies a verified address; existing accounts keep their fields.
    let user: User = sqlx::query_as(
        r#"INSERT INTO users (id, email, name, email_verified, image, created_at, updated_at)
        VALUES ($1, $2, $3, true, $4, NOW(), NOW())
        ON CONFLICT (email) DO UPDATE SET
            email_verified = true,
            image = COALESCE(users.image, EXCLUDED.image),
            updated_at = NOW()
        RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&name)
    .bind(&gh_user.avatar_url)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(github_id = gh_user.id, user_id = %user.id, "github sign-in");

    let session = sessions::issue(&state.db, &state.config, user.id).await?;
    let cookie = sessions::session_cookie(&state.config, &session.token);

    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(&state.config.org.dashboard_url),
    )
        .into_response())
}

pub async fn send_otp(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<OtpSendRequest>,
) -> AppResult<Json<Value>> {
    if !provisioning::valid_email(&body.email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }

    let ip = client_ip(&headers, Some(addr));
    let allowed = limits::check_signup_window(
        &state.cache,
        &ip,
        state.config.rate_limit.signup_max_attempts,
        state.config.rate_limit.signup_window_secs,
    )
    .await;
    if !allowed {
        return Err(AppError::RateLimited(SIGNUP_RATE_MESSAGE.into()));
    }

    let code = verification::issue(&state.db, &body.email, state.config.org.code_expiry_secs).await?;

    let name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE email = $1")
        .bind(&body.email)
        .fetch_optional(&state.db)
        .await?;

    let (subject, html) = mailer::verification_email(name.as_deref().unwrap_or("there"), &code);
    mailer::send_or_log(&state.mailer, &body.email, &subject, &html).await?;

    Ok(Json(json!({
        "success": true,
        "message": "A sign-in code has been sent.",
    })))
}

pub async fn sign_in_with_otp(
    State(state): State<AppState>,
    Json(body): Json<OtpSignInRequest>,
) -> AppResult<Response> {
    verification::validate_code_format(&body.code)?;

    // Confirm a live code exists before creating any account for the email.
    let code_valid: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM verifications WHERE identifier = $1 AND value = $2 AND expires_at > NOW())",
    )
    .bind(&body.email)
    .bind(&body.code)
    .fetch_one(&state.db)
    .await?;
    if !code_valid {
        return Err(AppError::BadRequest("Invalid or expired code".into()));
    }

    let default_name = body
        .name
        .clone()
        .unwrap_or_else(|| body.email.split('@').next().unwrap_or("Learner").to_string());

    sqlx::query(
        r#"INSERT INTO users (id, email, name, email_verified, created_at, updated_at)
        VALUES ($1, $2, $3, false, NOW(), NOW())
        ON CONFLICT (email) DO NOTHING"#,
    )
    .bind(Uuid::new_v4())
    .bind(&body.email)
    .bind(&default_name)
    .execute(&state.db)
    .await?;

    let user = verification::exchange(&state.db, &body.email, &body.code).await?;

    let session = sessions::issue(&state.db, &state.config, user.id).await?;
    let cookie = sessions::session_cookie(&state.config, &session.token);

    let body = json!({
        "success": true,
        "redirectTo": state.config.org.dashboard_url,
    });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let jar = axum_extra::extract::cookie::CookieJar::from_headers(&headers);
    if let Some(cookie) = jar.get(&state.config.session.cookie_name) {
        let token = cookie.value().to_string();
        sessions::revoke(&state.db, &token).await?;
        invalidate_context(&state, &token).await;
    }

    let cleared = sessions::clear_session_cookie(&state.config);
    Ok((
        [(header::SET_COOKIE, cleared)],
        Json(json!({ "success": true })),
    )
        .into_response())
}

pub async fn get_session(Extension(current): Extension<CurrentUser>) -> Json<Value> {
    Json(json!({
        "user": current.user,
        "session": { "expiresAt": current.expires_at },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_redirect_encodes_email() {
        assert_eq!(
            verify_redirect("/verify-email", "ada@acme.example"),
            "/verify-email?email=ada%40acme.example"
        );
        assert_eq!(
            verify_redirect("/verify-email", "ada+ops@acme.example"),
            "/verify-email?email=ada%2Bops%40acme.example"
        );
        assert_eq!(
            verify_redirect("/verify-email", "a&b@acme.example"),
            "/verify-email?email=a%26b%40acme.example"
        );
    }
}
