use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{CombinedRole, OrgRole, User};

/// Organization view attached to every authenticated session. `used_seats`
/// is a live count, recomputed per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgContext {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: String,
    #[serde(rename = "trialEndsAt")]
    pub trial_ends_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "maxSeats")]
    pub max_seats: i32,
    #[serde(rename = "usedSeats")]
    pub used_seats: i64,
}

/// User payload carried on the session after context composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(rename = "emailVerified")]
    pub email_verified: bool,
    pub image: Option<String>,
    pub role: Option<String>,
    #[serde(rename = "organizationId")]
    pub organization_id: Option<Uuid>,
    #[serde(rename = "organizationRole")]
    pub organization_role: Option<OrgRole>,
    pub organization: Option<OrgContext>,
    #[serde(rename = "combinedRole")]
    pub combined_role: CombinedRole,
}

/// System role "admin" wins; otherwise the organization role maps to its
/// org_* label; absence of both means an individual account.
pub fn derive_combined_role(system_role: Option<&str>, org_role: Option<OrgRole>) -> CombinedRole {
    if system_role == Some("admin") {
        return CombinedRole::Admin;
    }
    match org_role {
        Some(OrgRole::Owner) => CombinedRole::OrgOwner,
        Some(OrgRole::Admin) => CombinedRole::OrgAdmin,
        Some(OrgRole::Member) => CombinedRole::OrgMember,
        None => CombinedRole::Individual,
    }
}

pub fn compose_session_context(user: &User, organization: Option<OrgContext>) -> SessionUser {
    let org_role = user.org_role();
    SessionUser {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        email_verified: user.email_verified,
        image: user.image.clone(),
        role: user.role.clone(),
        organization_id: user.organization_id,
        organization_role: org_role,
        organization,
        combined_role: derive_combined_role(user.role.as_deref(), org_role),
    }
}

pub async fn load_org_context(db: &PgPool, org_id: Uuid) -> AppResult<Option<OrgContext>> {
    let org: Option<(
        Uuid,
        String,
        String,
        String,
        Option<chrono::DateTime<chrono::Utc>>,
        i32,
    )> = sqlx::query_as(
        "SELECT id, name, slug, status, trial_ends_at, max_seats FROM organizations WHERE id = $1",
    )
    .bind(org_id)
    .fetch_optional(db)
    .await?;

    let Some((id, name, slug, status, trial_ends_at, max_seats)) = org else {
        return Ok(None);
    };

    let used_seats: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)::bigint FROM users WHERE organization_id = $1",
    )
    .bind(org_id)
    .fetch_one(db)
    .await?;

    Ok(Some(OrgContext {
        id,
        name,
        slug,
        status,
        trial_ends_at,
        max_seats,
        used_seats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(system_role: Option<&str>, org_role: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            name: "A".into(),
            email_verified: true,
            image: None,
            role: system_role.map(String::from),
            organization_id: org_role.map(|_| Uuid::new_v4()),
            organization_role: org_role.map(String::from),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn system_admin_wins_over_org_role() {
        assert_eq!(
            derive_combined_role(Some("admin"), Some(OrgRole::Owner)),
            CombinedRole::Admin
        );
        assert_eq!(
            derive_combined_role(Some("admin"), None),
            CombinedRole::Admin
        );
    }

    #[test]
    fn org_roles_map_to_labels() {
        assert_eq!(
            derive_combined_role(None, Some(OrgRole::Owner)),
            CombinedRole::OrgOwner
        );
        assert_eq!(
            derive_combined_role(None, Some(OrgRole::Admin)),
            CombinedRole::OrgAdmin
        );
        assert_eq!(
            derive_combined_role(None, Some(OrgRole::Member)),
            CombinedRole::OrgMember
        );
    }

    #[test]
    fn no_roles_means_individual() {
        assert_eq!(derive_combined_role(None, None), CombinedRole::Individual);
        // Unknown system roles carry no weight.
        assert_eq!(
            derive_combined_role(Some("support"), None),
            CombinedRole::Individual
        );
    }

    #[test]
    fn compose_carries_org_fields() {
        let u = user(None, Some("MEMBER"));
        let composed = compose_session_context(&u, None);
        assert_eq!(composed.combined_role, CombinedRole::OrgMember);
        assert_eq!(composed.organization_id, u.organization_id);
        assert_eq!(composed.organization_role, Some(OrgRole::Member));
    }

    #[test]
    fn malformed_stored_role_degrades_to_individual() {
        let mut u = user(None, Some("SUPERUSER"));
        u.organization_role = Some("SUPERUSER".into());
        let composed = compose_session_context(&u, None);
        assert_eq!(composed.combined_role, CombinedRole::Individual);
    }
}
