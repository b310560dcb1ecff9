use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization-scoped role. Stored as uppercase TEXT, parsed at the boundary
/// so derivation logic can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Owner => "OWNER",
            OrgRole::Admin => "ADMIN",
            OrgRole::Member => "MEMBER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNER" => Some(OrgRole::Owner),
            "ADMIN" => Some(OrgRole::Admin),
            "MEMBER" => Some(OrgRole::Member),
            _ => None,
        }
    }

    /// OWNER and ADMIN may invite, remove members, and edit the organization.
    pub fn can_manage(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrgStatus {
    Trial,
    Active,
    Suspended,
    Cancelled,
}

impl OrgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgStatus::Trial => "TRIAL",
            OrgStatus::Active => "ACTIVE",
            OrgStatus::Suspended => "SUSPENDED",
            OrgStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRIAL" => Some(OrgStatus::Trial),
            "ACTIVE" => Some(OrgStatus::Active),
            "SUSPENDED" => Some(OrgStatus::Suspended),
            "CANCELLED" => Some(OrgStatus::Cancelled),
            _ => None,
        }
    }
}

/// PENDING -> {ACCEPTED, REJECTED, EXPIRED}; all terminal. EXPIRED is also
/// reached lazily when a PENDING invitation is read past its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "PENDING",
            InvitationStatus::Accepted => "ACCEPTED",
            InvitationStatus::Rejected => "REJECTED",
            InvitationStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(InvitationStatus::Pending),
            "ACCEPTED" => Some(InvitationStatus::Accepted),
            "REJECTED" => Some(InvitationStatus::Rejected),
            "EXPIRED" => Some(InvitationStatus::Expired),
            _ => None,
        }
    }
}

/// Single derived label merging the system role and the organization role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinedRole {
    Admin,
    OrgOwner,
    OrgAdmin,
    OrgMember,
    Individual,
}

impl CombinedRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombinedRole::Admin => "admin",
            CombinedRole::OrgOwner => "org_owner",
            CombinedRole::OrgAdmin => "org_admin",
            CombinedRole::OrgMember => "org_member",
            CombinedRole::Individual => "individual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub status: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub max_seats: i32,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrganizationInvitation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: String,
    pub status: String,
    pub token: String,
    pub invited_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OrganizationInvitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveMemberRequest {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrgRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "contactEmail")]
    pub contact_email: Option<String>,
    #[serde(rename = "contactPhone")]
    pub contact_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelInvitationRequest {
    #[serde(rename = "invitationId")]
    pub invitation_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn org_role_round_trip() {
        for role in [OrgRole::Owner, OrgRole::Admin, OrgRole::Member] {
            assert_eq!(OrgRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(OrgRole::parse("owner"), None);
        assert_eq!(OrgRole::parse(""), None);
    }

    #[test]
    fn manage_gate() {
        assert!(OrgRole::Owner.can_manage());
        assert!(OrgRole::Admin.can_manage());
        assert!(!OrgRole::Member.can_manage());
    }

    #[test]
    fn invitation_expiry_check() {
        let now = Utc::now();
        let invitation = OrganizationInvitation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: "x@example.com".into(),
            role: "MEMBER".into(),
            status: "PENDING".into(),
            token: "t".into(),
            invited_by: Uuid::new_v4(),
            expires_at: now - Duration::seconds(1),
            created_at: now - Duration::days(8),
        };
        assert!(invitation.is_expired(now));
        assert!(!invitation.is_expired(now - Duration::days(1)));
    }

    #[test]
    fn status_round_trip() {
        for s in ["TRIAL", "ACTIVE", "SUSPENDED", "CANCELLED"] {
            assert_eq!(OrgStatus::parse(s).map(|v| v.as_str()), Some(s));
        }
        for s in ["PENDING", "ACCEPTED", "REJECTED", "EXPIRED"] {
            assert_eq!(InvitationStatus::parse(s).map(|v| v.as_str()), Some(s));
        }
    }
}
