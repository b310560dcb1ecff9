use serde_json::json;

use crate::config::EmailConfig;
use crate::error::{AppError, AppResult};

/// Lightweight transactional-email client wrapping the provider's JSON API.
/// `None` when no API key is configured; callers log and continue in that
/// case so local development works without a provider account.
#[derive(Clone)]
pub struct EmailClient {
    api_key: String,
    api_url: String,
    from: String,
    client: reqwest::Client,
}

impl EmailClient {
    pub fn new(config: &EmailConfig) -> Option<Self> {
        if config.api_key.is_empty() {
            return None;
        }
        Some(Self {
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            from: config.from.clone(),
            client: reqwest::Client::new(),
        })
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<()> {
        let url = format!("{}/emails", self.api_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Email provider returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

pub async fn send_or_log(
    mailer: &Option<EmailClient>,
    to: &str,
    subject: &str,
    html: &str,
) -> AppResult<()> {
    match mailer {
        Some(client) => client.send(to, subject, html).await,
        None => {
            tracing::info!(to, subject, "email provider not configured, skipping send");
            Ok(())
        }
    }
}

pub fn verification_email(name: &str, code: &str) -> (String, String) {
    (
        "Verify your LearnStack account".to_string(),
        format!(
            "<p>Hi {},</p><p>Your verification code is <strong>{}</strong>. It expires in 10 minutes.</p>",
            name, code
        ),
    )
}

pub fn welcome_email(org_name: &str, name: &str, code: &str) -> (String, String) {
    (
        format!("Welcome to LearnStack, {}", org_name),
        format!(
            "<p>Hi {},</p><p>Your organization <strong>{}</strong> is ready. \
            Enter the code <strong>{}</strong> to verify your email and sign in. \
            It expires in 10 minutes.</p>",
            name, org_name, code
        ),
    )
}

pub fn invitation_email(org_name: &str, token: &str) -> (String, String) {
    (
        format!("You have been invited to {}", org_name),
        format!(
            "<p>You have been invited to join <strong>{}</strong> on LearnStack.</p>\
            <p>Use this invitation token to accept: <strong>{}</strong>. \
            The invitation expires in 7 days.</p>",
            org_name, token
        ),
    )
}
