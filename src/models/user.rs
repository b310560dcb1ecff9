use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::organization::OrgRole;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub image: Option<String>,
    /// System-level role; only "admin" carries meaning.
    pub role: Option<String>,
    pub organization_id: Option<Uuid>,
    pub organization_role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn org_role(&self) -> Option<OrgRole> {
        self.organization_role.as_deref().and_then(OrgRole::parse)
    }
}

#[derive(Debug, Deserialize)]
pub struct OrganizationSignupRequest {
    #[serde(rename = "organizationName")]
    pub organization_name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "contactEmail")]
    pub contact_email: Option<String>,
    #[serde(rename = "contactPhone")]
    pub contact_phone: Option<String>,
    #[serde(rename = "maxSeats")]
    pub max_seats: Option<i32>,
    #[serde(rename = "adminName")]
    pub admin_name: String,
    #[serde(rename = "adminEmail")]
    pub admin_email: String,
    #[serde(rename = "acceptTerms")]
    pub accept_terms: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifySignupRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct OtpSendRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct OtpSignInRequest {
    pub email: String,
    pub code: String,
    pub name: Option<String>,
}
