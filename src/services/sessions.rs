use chrono::{Duration, Utc};
use rand::RngCore;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::models::Session;

/// Opaque session token: 32 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The only code path that creates session rows. Both the framework login
/// flows (OAuth, OTP) and the organization-signup verification handler call
/// this, so cookie semantics cannot diverge.
pub async fn issue(db: &PgPool, config: &Config, user_id: Uuid) -> AppResult<Session> {
    let token = generate_token();
    let expires_at = Utc::now() + Duration::seconds(config.session.expiry_secs);

    let session: Session = sqlx::query_as(
        r#"INSERT INTO sessions (id, token, user_id, expires_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, NOW(), NOW())
        RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(&token)
    .bind(user_id)
    .bind(expires_at)
    .fetch_one(db)
    .await?;

    Ok(session)
}

pub async fn revoke(db: &PgPool, token: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(db)
        .await?;
    Ok(())
}

/// Set-Cookie value for the session token. HttpOnly, Lax, Secure in
/// production, Max-Age 30 days by default.
pub fn session_cookie(config: &Config, token: &str) -> String {
    build_cookie(
        &config.session.cookie_name,
        token,
        config.session.expiry_secs,
        config.is_production(),
    )
}

/// Set-Cookie value that clears the session cookie.
pub fn clear_session_cookie(config: &Config) -> String {
    build_cookie(&config.session.cookie_name, "", 0, config.is_production())
}

fn build_cookie(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        name, value, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn cookie_attributes() {
        let c = build_cookie("better-auth.session_token", "abc", 2592000, false);
        assert_eq!(
            c,
            "better-auth.session_token=abc; Max-Age=2592000; Path=/; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn cookie_secure_in_production() {
        let c = build_cookie("better-auth.session_token", "abc", 2592000, true);
        assert!(c.ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_empties_value() {
        let c = build_cookie("better-auth.session_token", "", 0, false);
        assert!(c.starts_with("better-auth.session_token=; Max-Age=0;"));
    }
}
