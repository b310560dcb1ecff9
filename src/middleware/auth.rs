use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};

use crate::error::{AppError, AppResult};
use crate::models::{Session, User};
use crate::services::context::{self, SessionUser};
use crate::AppState;

/// Authenticated request context: the composed session user plus the raw
/// token, which doubles as the context-cache key.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: SessionUser,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub fn context_cache_key(token: &str) -> String {
    format!("session-ctx:{}", token)
}

fn extract_token(req: &Request, cookie_name: &str) -> Option<String> {
    let jar = CookieJar::from_headers(req.headers());
    if let Some(cookie) = jar.get(cookie_name) {
        let value = cookie.value();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

/// Token -> composed session context. Recomputed per request (fresh role and
/// seat count) behind a short Redis cache; expired sessions are deleted
/// lazily and live sessions get a rolling expiry extension.
pub async fn resolve_session(state: &AppState, token: &str) -> AppResult<Option<CurrentUser>> {
    let cache_key = context_cache_key(token);
    if let Some(cached) = state.cache.get_json::<CachedContext>(&cache_key).await {
        return Ok(Some(CurrentUser {
            user: cached.user,
            token: token.to_string(),
            expires_at: cached.expires_at,
        }));
    }

    let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE token = $1")
        .bind(token)
        .fetch_optional(&state.db)
        .await?;

    let Some(mut session) = session else {
        return Ok(None);
    };

    let now = Utc::now();
    if session.expires_at < now {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session.id)
            .execute(&state.db)
            .await?;
        return Ok(None);
    }

    if now - session.updated_at > Duration::seconds(state.config.session.update_age_secs) {
        let new_expiry = now + Duration::seconds(state.config.session.expiry_secs);
        sqlx::query("UPDATE sessions SET expires_at = $1, updated_at = NOW() WHERE id = $2")
            .bind(new_expiry)
            .bind(session.id)
            .execute(&state.db)
            .await?;
        session.expires_at = new_expiry;
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(session.user_id)
        .fetch_optional(&state.db)
        .await?;

    let Some(user) = user else {
        // Orphaned session; treat as unauthenticated.
        return Ok(None);
    };

    let organization = match user.organization_id {
        Some(org_id) => context::load_org_context(&state.db, org_id).await?,
        None => None,
    };

    let composed = context::compose_session_context(&user, organization);
    let current = CurrentUser {
        user: composed,
        token: token.to_string(),
        expires_at: session.expires_at,
    };

    state
        .cache
        .set_json(
            &cache_key,
            &CachedContext {
                user: current.user.clone(),
                expires_at: current.expires_at,
            },
            state.config.session.cache_secs,
        )
        .await;

    Ok(Some(current))
}

/// Serializable subset cached in Redis (the token is the key).
#[derive(serde::Serialize, serde::Deserialize)]
struct CachedContext {
    user: SessionUser,
    #[serde(rename = "expiresAt")]
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Middleware: requires a valid session. Sets CurrentUser in extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&req, &state.config.session.cookie_name)
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    let current = resolve_session(&state, &token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".into()))?;

    req.extensions_mut().insert(current);
    Ok(next.run(req).await)
}

/// Drop the cached context for a token after a mutation that changes the
/// caller's organization state.
pub async fn invalidate_context(state: &AppState, token: &str) {
    state.cache.del(&context_cache_key(token)).await;
}
