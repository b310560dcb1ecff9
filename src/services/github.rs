use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::config::GithubConfig;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// Minimal GitHub OAuth client wrapping raw HTTP calls, same shape as the
/// other outbound clients: constructed once, `None` when unconfigured.
#[derive(Clone)]
pub struct GitHubClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    state_secret: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: &GithubConfig, state_secret: &str) -> Option<Self> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return None;
        }
        Some(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            state_secret: state_secret.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// `state` = base64url(nonce) + "." + hex(HMAC-SHA256(nonce)).
    pub fn sign_state(&self) -> String {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = URL_SAFE_NO_PAD.encode(nonce);
        let sig = self.state_signature(&payload);
        format!("{}.{}", payload, sig)
    }

    pub fn verify_state(&self, state: &str) -> bool {
        let Some((payload, sig)) = state.split_once('.') else {
            return false;
        };
        if URL_SAFE_NO_PAD.decode(payload).is_err() {
            return false;
        }
        self.state_signature(payload) == sig
    }

    fn state_signature(&self, payload: &str) -> String {
        // new_from_slice accepts any key length for HMAC.
        let mut mac = HmacSha256::new_from_slice(self.state_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn authorize_url(&self) -> String {
        format!(
            "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode("read:user user:email"),
            self.sign_state()
        )
    }

    pub async fn exchange_code(&self, code: &str) -> AppResult<String> {
        let resp = self
            .client
            .post("https://github.com/login/oauth/access_token")
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("GitHub token request failed: {}", e)))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("GitHub token response parse failed: {}", e)))?;

        body["access_token"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| AppError::Unauthorized("GitHub code exchange failed".into()))
    }

    pub async fn fetch_user(&self, access_token: &str) -> AppResult<GitHubUser> {
        let resp = self
            .client
            .get("https://api.github.com/user")
            .bearer_auth(access_token)
            .header("User-Agent", "learnstack-api")
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("GitHub user request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::Unauthorized("GitHub rejected the access token".into()));
        }

        resp.json()
            .await
            .map_err(|e| AppError::Internal(format!("GitHub user response parse failed: {}", e)))
    }

    /// The /user payload omits private emails; fall back to /user/emails and
    /// pick the primary verified address.
    pub async fn fetch_primary_email(&self, access_token: &str) -> AppResult<Option<String>> {
        let resp = self
            .client
            .get("https://api.github.com/user/emails")
            .bearer_auth(access_token)
            .header("User-Agent", "learnstack-api")
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("GitHub emails request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let emails: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("GitHub emails parse failed: {}", e)))?;

        Ok(emails
            .iter()
            .find(|e| e["primary"].as_bool() == Some(true) && e["verified"].as_bool() == Some(true))
            .or_else(|| emails.first())
            .and_then(|e| e["email"].as_str())
            .map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        GitHubClient::new(
            &GithubConfig {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                redirect_uri: "http://localhost:3000/api/auth/callback/github".into(),
            },
            "state-secret",
        )
        .unwrap()
    }

    #[test]
    fn none_when_unconfigured() {
        let unset = GithubConfig {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
        };
        assert!(GitHubClient::new(&unset, "s").is_none());
    }

    #[test]
    fn state_round_trip() {
        let c = client();
        let state = c.sign_state();
        assert!(c.verify_state(&state));
    }

    #[test]
    fn tampered_state_rejected() {
        let c = client();
        let state = c.sign_state();
        let (payload, sig) = state.split_once('.').unwrap();
        assert!(!c.verify_state(&format!("{}x.{}", payload, sig)));
        assert!(!c.verify_state(&format!("{}.{}0", payload, &sig[..sig.len() - 1])));
        assert!(!c.verify_state("no-dot-here"));
    }

    #[test]
    fn authorize_url_is_query_encoded() {
        let url = client().authorize_url();
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fapi%2Fauth%2Fcallback%2Fgithub"
        ));
        assert!(url.contains("scope=read%3Auser%20user%3Aemail"));
    }

    #[test]
    fn state_differs_per_call() {
        let c = client();
        assert_ne!(c.sign_state(), c.sign_state());
    }
}
