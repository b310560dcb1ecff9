use axum::{extract::State, Extension, Json};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{invalidate_context, CurrentUser};
use crate::models::organization::*;
use crate::services::context::load_org_context;
use crate::services::{mailer, provisioning};
use crate::AppState;

fn require_org(current: &CurrentUser) -> AppResult<Uuid> {
    current
        .user
        .organization_id
        .ok_or_else(|| AppError::BadRequest("You do not belong to an organization".into()))
}

/// Invite, remove, update, and invitation views require OWNER or ADMIN.
fn require_manager(current: &CurrentUser) -> AppResult<(Uuid, OrgRole)> {
    let org_id = require_org(current)?;
    match current.user.organization_role {
        Some(role) if role.can_manage() => Ok((org_id, role)),
        _ => Err(AppError::Forbidden(
            "Must be an organization owner or admin".into(),
        )),
    }
}

/// Seat gate: invitations are blocked once current membership fills the plan.
fn has_free_seat(used_seats: i64, max_seats: i32) -> bool {
    used_seats < i64::from(max_seats)
}

/// Owners cannot leave; ownership must be transferred first.
fn may_leave(role: Option<OrgRole>) -> bool {
    role != Some(OrgRole::Owner)
}

fn invitation_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn log_activity(
    executor: impl sqlx::PgExecutor<'_>,
    org_id: Uuid,
    actor_id: Option<Uuid>,
    action: &str,
    metadata: Value,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO organization_activities (id, organization_id, actor_id, action, metadata, created_at) VALUES ($1, $2, $3, $4, $5, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(actor_id)
    .bind(action)
    .bind(metadata)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn create_org(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<CreateOrgRequest>,
) -> AppResult<Json<Value>> {
    if current.user.organization_id.is_some() {
        return Err(AppError::Conflict(
            "You already belong to an organization".into(),
        ));
    }
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("Organization name is required".into()));
    }

    let slug = match &body.slug {
        Some(s) if provisioning::valid_slug(s) => s.clone(),
        Some(_) => {
            return Err(AppError::BadRequest(
                "Slug may only contain lowercase letters, digits and dashes".into(),
            ))
        }
        None => provisioning::normalize_slug(&body.name),
    };

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

    let org_id = Uuid::new_v4();
    let trial_ends_at = Utc::now() + Duration::days(state.config.org.trial_days);

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"INSERT INTO organizations
        (id, name, slug, description, status, trial_ends_at, max_seats, owner_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())"#,
    )
    .bind(org_id)
    .bind(&body.name)
    .bind(&slug)
    .bind(&body.description)
    .bind(OrgStatus::Trial.as_str())
    .bind(trial_ends_at)
    .bind(state.config.org.default_max_seats)
    .bind(current.user.id)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "An organization with this slug already exists"))?;

    sqlx::query(
        "UPDATE users SET organization_id = $1, organization_role = $2, updated_at = NOW() WHERE id = $3",
    )
    .bind(org_id)
    .bind(OrgRole::Owner.as_str())
    .bind(current.user.id)
    .execute(&mut *tx)
    .await?;

    log_activity(
        &mut *tx,
        org_id,
        Some(current.user.id),
        "organization.created",
        json!({ "slug": slug }),
    )
    .await?;

    tx.commit().await?;
    invalidate_context(&state, &current.token).await;

    Ok(Json(json!({
        "id": org_id,
        "name": body.name,
        "slug": slug,
        "status": OrgStatus::Trial.as_str(),
        "role": OrgRole::Owner.as_str(),
    })))
}

pub async fn invite(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<InviteRequest>,
) -> AppResult<Json<Value>> {
    let (org_id, _) = require_manager(&current)?;

    if !provisioning::valid_email(&body.email) {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }

    let role = match body.role.as_deref() {
        None => OrgRole::Member,
        Some(s) => OrgRole::parse(s)
            .ok_or_else(|| AppError::BadRequest("Unknown role".into()))?,
    };
    // Exactly one OWNER per organization; ownership is never granted by invite.
    if role == OrgRole::Owner {
        return Err(AppError::BadRequest("Cannot invite an owner".into()));
    }

    let (org_name, max_seats): (String, i32) =
        sqlx::query_as("SELECT name, max_seats FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_one(&state.db)
            .await?;

    let used_seats: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::bigint FROM users WHERE organization_id = $1")
            .bind(org_id)
            .fetch_one(&state.db)
            .await?;
    if !has_free_seat(used_seats, max_seats) {
        return Err(AppError::Forbidden(
            "No seats available for your plan".into(),
        ));
    }

    let already_member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND organization_id = $2)",
    )
    .bind(&body.email)
    .bind(org_id)
    .fetch_one(&state.db)
    .await?;
    if already_member {
        return Err(AppError::Conflict(
            "User is already a member of this organization".into(),
        ));
    }

    let pending_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM organization_invitations WHERE organization_id = $1 AND email = $2 AND status = 'PENDING')",
    )
    .bind(org_id)
    .bind(&body.email)
    .fetch_one(&state.db)
    .await?;
    if pending_exists {
        return Err(AppError::Conflict(
            "An invitation is already pending for this email".into(),
        ));
    }

    let invitation_id = Uuid::new_v4();
    let token = invitation_token();
    let expires_at = Utc::now() + Duration::days(state.config.org.invite_expiry_days);

    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"INSERT INTO organization_invitations
        (id, organization_id, email, role, status, token, invited_by, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())"#,
    )
    .bind(invitation_id)
    .bind(org_id)
    .bind(&body.email)
    .bind(role.as_str())
    .bind(InvitationStatus::Pending.as_str())
    .bind(&token)
    .bind(current.user.id)
    .bind(expires_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        AppError::conflict_on_unique(e, "An invitation is already pending for this email")
    })?;

    log_activity(
        &mut *tx,
        org_id,
        Some(current.user.id),
        "member.invited",
        json!({ "email": body.email, "role": role.as_str() }),
    )
    .await?;

    tx.commit().await?;

    let (subject, html) = mailer::invitation_email(&org_name, &token);
    mailer::send_or_log(&state.mailer, &body.email, &subject, &html).await?;

    Ok(Json(json!({
        "id": invitation_id,
        "email": body.email,
        "role": role.as_str(),
        "status": InvitationStatus::Pending.as_str(),
        "expiresAt": expires_at,
    })))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<AcceptInvitationRequest>,
) -> AppResult<Json<Value>> {
    let invitation: Option<OrganizationInvitation> =
        sqlx::query_as("SELECT * FROM organization_invitations WHERE token = $1")
            .bind(&body.token)
            .fetch_optional(&state.db)
            .await?;
    let invitation =
        invitation.ok_or_else(|| AppError::NotFound("Invitation not found".into()))?;

    let status = InvitationStatus::parse(&invitation.status)
        .ok_or_else(|| AppError::Internal("Corrupt invitation status".into()))?;

    if status == InvitationStatus::Pending && invitation.is_expired(Utc::now()) {
        sqlx::query("UPDATE organization_invitations SET status = $1 WHERE id = $2")
            .bind(InvitationStatus::Expired.as_str())
            .bind(invitation.id)
            .execute(&state.db)
            .await?;
        return Err(AppError::BadRequest("Invitation has expired".into()));
    }
    if status != InvitationStatus::Pending {
        return Err(AppError::BadRequest("Invitation is no longer valid".into()));
    }
    if invitation.email != current.user.email {
        return Err(AppError::Forbidden(
            "This invitation was issued to a different email".into(),
        ));
    }
    if current.user.organization_id.is_some() {
        return Err(AppError::Conflict(
            "You already belong to an organization".into(),
        ));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE users SET organization_id = $1, organization_role = $2, updated_at = NOW() WHERE id = $3",
    )
    .bind(invitation.organization_id)
    .bind(&invitation.role)
    .bind(current.user.id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE organization_invitations SET status = $1 WHERE id = $2")
        .bind(InvitationStatus::Accepted.as_str())
        .bind(invitation.id)
        .execute(&mut *tx)
        .await?;

    log_activity(
        &mut *tx,
        invitation.organization_id,
        Some(current.user.id),
        "member.joined",
        json!({ "email": current.user.email, "role": invitation.role }),
    )
    .await?;

    tx.commit().await?;
    invalidate_context(&state, &current.token).await;

    Ok(Json(json!({
        "success": true,
        "organizationId": invitation.organization_id,
        "role": invitation.role,
    })))
}

pub async fn leave(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> AppResult<Json<Value>> {
    let org_id = require_org(&current)?;

    if !may_leave(current.user.organization_role) {
        return Err(AppError::Forbidden(
            "Owners must transfer ownership before leaving".into(),
        ));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE users SET organization_id = NULL, organization_role = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(current.user.id)
    .execute(&mut *tx)
    .await?;

    log_activity(
        &mut *tx,
        org_id,
        Some(current.user.id),
        "member.left",
        json!({ "email": current.user.email }),
    )
    .await?;

    tx.commit().await?;
    invalidate_context(&state, &current.token).await;

    Ok(Json(json!({ "success": true })))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<RemoveMemberRequest>,
) -> AppResult<Json<Value>> {
    let (org_id, _) = require_manager(&current)?;

    if body.user_id == current.user.id {
        return Err(AppError::BadRequest(
            "Use leave to remove yourself".into(),
        ));
    }

    let target: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
        "SELECT id, email, organization_role FROM users WHERE id = $1 AND organization_id = $2",
    )
    .bind(body.user_id)
    .bind(org_id)
    .fetch_optional(&state.db)
    .await?;
    let (target_id, target_email, target_role) =
        target.ok_or_else(|| AppError::NotFound("Member not found".into()))?;

    if target_role.as_deref().and_then(OrgRole::parse) == Some(OrgRole::Owner) {
        return Err(AppError::Forbidden(
            "Cannot remove the organization owner".into(),
        ));
    }

    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE users SET organization_id = NULL, organization_role = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(target_id)
    .execute(&mut *tx)
    .await?;

    log_activity(
        &mut *tx,
        org_id,
        Some(current.user.id),
        "member.removed",
        json!({ "userId": target_id, "email": target_email }),
    )
    .await?;

    tx.commit().await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn update_org(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<UpdateOrgRequest>,
) -> AppResult<Json<Value>> {
    let (org_id, _) = require_manager(&current)?;

    let org: Organization = sqlx::query_as(
        r#"UPDATE organizations SET
            name = COALESCE($1, name),
            description = COALESCE($2, description),
            contact_email = COALESCE($3, contact_email),
            contact_phone = COALESCE($4, contact_phone),
            updated_at = NOW()
        WHERE id = $5
        RETURNING *"#,
    )
    .bind(&body.name)
    .bind(&body.description)
    .bind(&body.contact_email)
    .bind(&body.contact_phone)
    .bind(org_id)
    .fetch_one(&state.db)
    .await?;

    log_activity(
        &state.db,
        org_id,
        Some(current.user.id),
        "organization.updated",
        json!({ "name": org.name }),
    )
    .await?;

    Ok(Json(json!({
        "id": org.id,
        "name": org.name,
        "slug": org.slug,
        "description": org.description,
        "contactEmail": org.contact_email,
        "contactPhone": org.contact_phone,
        "status": org.status,
        "maxSeats": org.max_seats,
    })))
}

pub async fn get_org(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> AppResult<Json<Value>> {
    let org_id = require_org(&current)?;

    let context = load_org_context(&state.db, org_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Organization not found".into()))?;

    Ok(Json(json!({ "organization": context })))
}

pub async fn get_members(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> AppResult<Json<Value>> {
    let org_id = require_org(&current)?;

    let rows: Vec<(Uuid, String, String, Option<String>, chrono::DateTime<Utc>)> = sqlx::query_as(
        r#"SELECT id, email, name, organization_role, created_at
        FROM users WHERE organization_id = $1 ORDER BY created_at"#,
    )
    .bind(org_id)
    .fetch_all(&state.db)
    .await?;

    let members: Vec<Value> = rows
        .iter()
        .map(|(id, email, name, role, joined)| {
            json!({
                "id": id,
                "email": email,
                "name": name,
                "role": role,
                "joinedAt": joined,
            })
        })
        .collect();

    Ok(Json(json!({ "members": members })))
}

pub async fn get_invitations(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> AppResult<Json<Value>> {
    let (org_id, _) = require_manager(&current)?;

    // Lazy transition: anything PENDING past its expiry flips to EXPIRED.
    sqlx::query(
        "UPDATE organization_invitations SET status = 'EXPIRED' WHERE organization_id = $1 AND status = 'PENDING' AND expires_at < NOW()",
    )
    .bind(org_id)
    .execute(&state.db)
    .await?;

    let rows: Vec<OrganizationInvitation> = sqlx::query_as(
        "SELECT * FROM organization_invitations WHERE organization_id = $1 ORDER BY created_at DESC",
    )
    .bind(org_id)
    .fetch_all(&state.db)
    .await?;

    let invitations: Vec<Value> = rows
        .iter()
        .map(|inv| {
            json!({
                "id": inv.id,
                "email": inv.email,
                "role": inv.role,
                "status": inv.status,
                "expiresAt": inv.expires_at,
                "createdAt": inv.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "invitations": invitations })))
}

pub async fn cancel_invitation(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<CancelInvitationRequest>,
) -> AppResult<Json<Value>> {
    let (org_id, _) = require_manager(&current)?;

    let result = sqlx::query(
        "UPDATE organization_invitations SET status = 'REJECTED' WHERE id = $1 AND organization_id = $2 AND status = 'PENDING'",
    )
    .bind(body.invitation_id)
    .bind(org_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Pending invitation not found".into()));
    }

    log_activity(
        &state.db,
        org_id,
        Some(current.user.id),
        "invitation.cancelled",
        json!({ "invitationId": body.invitation_id }),
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn get_activity(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> AppResult<Json<Value>> {
    let (org_id, _) = require_manager(&current)?;

    let rows: Vec<(Uuid, Option<Uuid>, String, Option<Value>, chrono::DateTime<Utc>)> =
        sqlx::query_as(
            r#"SELECT id, actor_id, action, metadata, created_at
            FROM organization_activities WHERE organization_id = $1
            ORDER BY created_at DESC LIMIT 50"#,
        )
        .bind(org_id)
        .fetch_all(&state.db)
        .await?;

    let activity: Vec<Value> = rows
        .iter()
        .map(|(id, actor, action, metadata, created)| {
            json!({
                "id": id,
                "actorId": actor,
                "action": action,
                "metadata": metadata,
                "createdAt": created,
            })
        })
        .collect();

    Ok(Json(json!({ "activity": activity })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CombinedRole;
    use crate::services::context::SessionUser;

    fn current(org: Option<Uuid>, role: Option<OrgRole>) -> CurrentUser {
        CurrentUser {
            user: SessionUser {
                id: Uuid::new_v4(),
                email: "m@example.com".into(),
                name: "M".into(),
                email_verified: true,
                image: None,
                role: None,
                organization_id: org,
                organization_role: role,
                organization: None,
                combined_role: CombinedRole::Individual,
            },
            token: "t".into(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn org_required() {
        assert!(require_org(&current(None, None)).is_err());
        let org = Uuid::new_v4();
        assert_eq!(require_org(&current(Some(org), None)).unwrap(), org);
    }

    #[test]
    fn manager_gate_rejects_members() {
        let org = Uuid::new_v4();
        assert!(require_manager(&current(Some(org), Some(OrgRole::Member))).is_err());
        assert!(require_manager(&current(Some(org), None)).is_err());
        assert!(require_manager(&current(Some(org), Some(OrgRole::Admin))).is_ok());
        assert!(require_manager(&current(Some(org), Some(OrgRole::Owner))).is_ok());
    }

    #[test]
    fn seat_gate_blocks_full_plans() {
        assert!(has_free_seat(0, 5));
        assert!(has_free_seat(4, 5));
        assert!(!has_free_seat(5, 5));
        assert!(!has_free_seat(6, 5));
        assert!(!has_free_seat(0, 0));
    }

    #[test]
    fn only_non_owners_may_leave() {
        assert!(may_leave(Some(OrgRole::Member)));
        assert!(may_leave(Some(OrgRole::Admin)));
        assert!(may_leave(None));
        assert!(!may_leave(Some(OrgRole::Owner)));
    }

    #[test]
    fn invitation_tokens_are_unique_hex() {
        let t = invitation_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t, invitation_token());
    }
}
