use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{OrgRole, OrgStatus, OrganizationSignupRequest};
use crate::services::{mailer, verification};
use crate::AppState;

pub struct SignupOutcome {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub slug: String,
}

pub fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && domain.len() >= 3,
        None => false,
    }
}

pub fn normalize_slug(name: &str) -> String {
    name.to_lowercase()
        .replace(|c: char| !c.is_alphanumeric(), "-")
        .trim_matches('-')
        .to_string()
}

pub fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
}

pub fn validate_signup(req: &OrganizationSignupRequest) -> AppResult<String> {
    if !req.accept_terms {
        return Err(AppError::BadRequest(
            "You must accept the terms of service".into(),
        ));
    }
    if req.organization_name.trim().is_empty() {
        return Err(AppError::BadRequest("Organization name is required".into()));
    }
    if req.admin_name.trim().is_empty() {
        return Err(AppError::BadRequest("Admin name is required".into()));
    }
    if !valid_email(&req.admin_email) {
        return Err(AppError::BadRequest("A valid admin email is required".into()));
    }
    if let Some(seats) = req.max_seats {
        if seats < 1 {
            return Err(AppError::BadRequest("Seat count must be at least 1".into()));
        }
    }
    let slug = match &req.slug {
        Some(s) => {
            if !valid_slug(s) {
                return Err(AppError::BadRequest(
                    "Slug may only contain lowercase letters, digits and dashes".into(),
                ));
            }
            s.clone()
        }
        None => normalize_slug(&req.organization_name),
    };
    if slug.is_empty() {
        return Err(AppError::BadRequest("Slug is required".into()));
    }
    Ok(slug)
}

/// Atomically create Organization (TRIAL), owning admin User (unverified),
/// Verification code and one activity row; send the welcome email after the
/// transaction commits. Rate limiting happens in the route before this runs.
pub async fn create_organization_with_admin(
    state: &AppState,
    req: &OrganizationSignupRequest,
) -> AppResult<SignupOutcome> {
    let slug = validate_signup(req)?;

    // Pre-checks give the friendly message in the common case; the inserts
    // below re-map unique violations so a concurrent duplicate gets the same
    // answer instead of a 500.
    let slug_taken: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE slug = $1)")
            .bind(&slug)
            .fetch_one(&state.db)
            .await?;
    if slug_taken {
        return Err(AppError::Conflict(
            "An organization with this slug already exists".into(),
        ));
    }

    let email_taken: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(&req.admin_email)
            .fetch_one(&state.db)
            .await?;
    if email_taken {
        return Err(AppError::Conflict(
            "An account with this email already exists".into(),
        ));
    }

    let org_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let code = verification::generate_code();
    let trial_ends_at = Utc::now() + Duration::days(state.config.org.trial_days);
    let code_expires_at = Utc::now() + Duration::seconds(state.config.org.code_expiry_secs);
    let max_seats = req.max_seats.unwrap_or(state.config.org.default_max_seats);

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"INSERT INTO organizations
        (id, name, slug, description, contact_email, contact_phone, status, trial_ends_at, max_seats, owner_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())"#,
    )
    .bind(org_id)
    .bind(&req.organization_name)
    .bind(&slug)
    .bind(&req.description)
    .bind(&req.contact_email)
    .bind(&req.contact_phone)
    .bind(OrgStatus::Trial.as_str())
    .bind(trial_ends_at)
    .bind(max_seats)
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "An organization with this slug already exists"))?;

    sqlx::query(
        r#"INSERT INTO users
        (id, email, name, email_verified, organization_id, organization_role, created_at, updated_at)
        VALUES ($1, $2, $3, false, $4, $5, NOW(), NOW())"#,
    )
    .bind(user_id)
    .bind(&req.admin_email)
    .bind(&req.admin_name)
    .bind(org_id)
    .bind(OrgRole::Owner.as_str())
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "An account with this email already exists"))?;

    sqlx::query(
        "INSERT INTO verifications (id, identifier, value, expires_at, created_at) VALUES ($1, $2, $3, $4, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(&req.admin_email)
    .bind(&code)
    .bind(code_expires_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO organization_activities (id, organization_id, actor_id, action, metadata, created_at) VALUES ($1, $2, $3, $4, $5, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(user_id)
    .bind("organization.created")
    .bind(json!({ "slug": slug, "maxSeats": max_seats }))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    // Dispatch after commit. A failure here leaves the committed rows in
    // place; the owner can request a fresh code via the OTP endpoint.
    let (subject, html) = mailer::welcome_email(&req.organization_name, &req.admin_name, &code);
    mailer::send_or_log(&state.mailer, &req.admin_email, &subject, &html).await?;

    Ok(SignupOutcome {
        organization_id: org_id,
        user_id,
        slug,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup() -> OrganizationSignupRequest {
        OrganizationSignupRequest {
            organization_name: "Acme Corp".into(),
            slug: None,
            description: None,
            contact_email: None,
            contact_phone: None,
            max_seats: Some(10),
            admin_name: "Ada".into(),
            admin_email: "ada@acme.example".into(),
            accept_terms: true,
        }
    }

    #[test]
    fn slug_derived_from_name() {
        assert_eq!(normalize_slug("Acme Corp"), "acme-corp");
        assert_eq!(normalize_slug("Acme, Inc."), "acme--inc");
        assert_eq!(normalize_slug("---"), "");
    }

    #[test]
    fn slug_validation() {
        assert!(valid_slug("acme-corp"));
        assert!(valid_slug("a1"));
        assert!(!valid_slug("Acme"));
        assert!(!valid_slug("-acme"));
        assert!(!valid_slug("acme-"));
        assert!(!valid_slug(""));
    }

    #[test]
    fn email_validation() {
        assert!(valid_email("ada@acme.example"));
        assert!(!valid_email("ada"));
        assert!(!valid_email("@acme.example"));
        assert!(!valid_email("ada@ex"));
    }

    #[test]
    fn terms_must_be_accepted() {
        let mut req = signup();
        req.accept_terms = false;
        assert!(validate_signup(&req).is_err());
    }

    #[test]
    fn zero_seats_rejected() {
        let mut req = signup();
        req.max_seats = Some(0);
        assert!(validate_signup(&req).is_err());
    }

    #[test]
    fn valid_signup_yields_slug() {
        assert_eq!(validate_signup(&signup()).unwrap(), "acme-corp");
        let mut req = signup();
        req.slug = Some("custom-slug".into());
        assert_eq!(validate_signup(&req).unwrap(), "custom-slug");
    }
}
