use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{User, Verification};

/// 6-digit numeric one-time code.
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

pub fn validate_code_format(code: &str) -> AppResult<()> {
    if code.len() != 6 {
        return Err(AppError::BadRequest("Code must be 6 digits".into()));
    }
    Ok(())
}

/// Replace any outstanding code for this email and return the fresh one.
/// The insert runs on the given pool; provisioning inlines the same insert
/// inside its transaction instead.
pub async fn issue(db: &PgPool, email: &str, expiry_secs: i64) -> AppResult<String> {
    let code = generate_code();
    let expires_at = Utc::now() + Duration::seconds(expiry_secs);

    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM verifications WHERE identifier = $1")
        .bind(email)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO verifications (id, identifier, value, expires_at, created_at) VALUES ($1, $2, $3, $4, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(&code)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(code)
}

/// Consume a code: exact identifier+value match, unexpired, deleted on use.
/// Wrong, expired, and already-used codes all fail with the same message so
/// the endpoint leaks nothing about which case occurred.
pub async fn exchange(db: &PgPool, email: &str, code: &str) -> AppResult<User> {
    validate_code_format(code)?;

    let verification: Option<Verification> = sqlx::query_as(
        "SELECT * FROM verifications WHERE identifier = $1 AND value = $2 AND expires_at > NOW()",
    )
    .bind(email)
    .bind(code)
    .fetch_optional(db)
    .await?;

    let verification =
        verification.ok_or_else(|| AppError::BadRequest("Invalid or expired code".into()))?;

    // The user must exist for a valid code; defensive 404 if it does not.
    let mut tx = db.begin().await?;

    let user: Option<User> = sqlx::query_as(
        "UPDATE users SET email_verified = true, updated_at = NOW() WHERE email = $1 RETURNING *",
    )
    .bind(email)
    .fetch_optional(&mut *tx)
    .await?;

    let user = user.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    sqlx::query("DELETE FROM verifications WHERE id = $1")
        .bind(verification.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert!(!code.starts_with('0'));
        }
    }

    #[test]
    fn format_check_rejects_wrong_length() {
        assert!(validate_code_format("123456").is_ok());
        assert!(validate_code_format("12345").is_err());
        assert!(validate_code_format("1234567").is_err());
        assert!(validate_code_format("").is_err());
    }
}
