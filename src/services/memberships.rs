//! Workspace membership lifecycle.
//!
//! Every operation checks all of its guards before its first write. Operations
//! that can reduce the number of owners (role change, removal, leave, transfer)
//! run under a per-workspace lock so that two of them in this process cannot both
//! pass the owner-count check. Reads used for authorization never take the lock.
//! Writers in other processes are not serialized by it.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::permissions::{Permission, Role, can_modify_member, has_permission};
use crate::error::{AppError, AppResult};
use crate::locks::KeyedLocks;
use crate::models::{SessionMetadata, WorkspaceMembership, membership_id};
use crate::services::audit::{AuditEvent, AuditLog, actions};
use crate::services::sessions::SessionManager;
use crate::store::{RowFilter, Versions};

/// Stable `Forbidden` / `Conflict` reasons.
pub mod reasons {
    pub const NOT_A_MEMBER: &str = "not a member of this workspace";
    pub const CANNOT_MODIFY_SELF: &str = "cannot change your own role";
    pub const CANNOT_REMOVE_SELF: &str = "cannot remove yourself, leave the workspace instead";
    pub const INSUFFICIENT_RANK: &str = "cannot modify a member of equal or higher rank";
    pub const CANNOT_PROMOTE_TO_OWN_RANK: &str = "cannot promote to your rank or higher";
    pub const ONLY_OWNER_CAN_PROMOTE_TO_OWNER: &str = "only owners can promote to owner";
    pub const ONLY_OWNER_CAN_REMOVE_OWNER: &str = "only owners can remove an owner";
    pub const ONLY_OWNER_CAN_TRANSFER: &str = "only owners can transfer ownership";
    pub const CANNOT_TRANSFER_TO_SELF: &str = "cannot transfer ownership to yourself";
    pub const LAST_OWNER: &str = "workspace must keep at least one owner";
    pub const ALREADY_MEMBER: &str = "user is already a member of this workspace";
}

/// Rank rule shared by role grants: non-owners never grant their own rank or
/// higher, and only owners grant `owner`.
fn check_grant(actor: Role, granted: Role) -> AppResult<()> {
    if actor != Role::Owner && granted.rank() >= actor.rank() {
        return Err(AppError::Forbidden(reasons::CANNOT_PROMOTE_TO_OWN_RANK));
    }
    if granted == Role::Owner && actor != Role::Owner {
        return Err(AppError::Forbidden(reasons::ONLY_OWNER_CAN_PROMOTE_TO_OWNER));
    }
    Ok(())
}

fn require_permission(member: &WorkspaceMembership, permission: Permission) -> AppResult<()> {
    if has_permission(member.role, permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden(permission.denial_reason()))
    }
}

pub struct MembershipManager {
    versions: Versions,
    sessions: Arc<SessionManager>,
    locks: KeyedLocks<Uuid>,
    audit: AuditLog,
}

impl MembershipManager {
    pub fn new(versions: Versions, sessions: Arc<SessionManager>, audit: AuditLog) -> Self {
        Self {
            versions,
            sessions,
            locks: KeyedLocks::default(),
            audit,
        }
    }

    /// Current membership of `user_id`, if any.
    pub async fn membership_of(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<WorkspaceMembership>> {
        self.versions
            .resolve_latest(membership_id(workspace_id, user_id))
            .await
    }

    pub async fn get(&self, workspace_id: Uuid, user_id: Uuid) -> AppResult<WorkspaceMembership> {
        self.membership_of(workspace_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Member".to_string()))
    }

    /// All current members, oldest first.
    pub async fn list(&self, workspace_id: Uuid) -> AppResult<Vec<WorkspaceMembership>> {
        let mut members: Vec<WorkspaceMembership> = self
            .versions
            .resolve_latest_many(RowFilter::new().eq("workspace_id", workspace_id))
            .await?;
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    /// Number of owners, always read fresh from the store.
    pub async fn count_owners(&self, workspace_id: Uuid) -> AppResult<usize> {
        // Role is mutable, so it is filtered after resolution.
        Ok(self
            .list(workspace_id)
            .await?
            .iter()
            .filter(|m| m.is_owner())
            .count())
    }

    async fn actor(&self, workspace_id: Uuid, actor_id: Uuid) -> AppResult<WorkspaceMembership> {
        self.membership_of(workspace_id, actor_id)
            .await?
            .ok_or(AppError::Forbidden(reasons::NOT_A_MEMBER))
    }

    /// Create a workspace whose first member is `owner_id`.
    pub async fn create_workspace(
        &self,
        owner_id: Uuid,
        client: &SessionMetadata,
    ) -> AppResult<WorkspaceMembership> {
        let workspace_id = Uuid::now_v7();
        let owner = self
            .versions
            .put(WorkspaceMembership::new(workspace_id, owner_id, Role::Owner, None))
            .await?;

        tracing::info!(%workspace_id, %owner_id, "Workspace created");
        self.audit
            .record(
                AuditEvent::new(actions::WORKSPACE_CREATED, "workspace")
                    .actor(owner_id)
                    .workspace(workspace_id)
                    .client(client)
                    .target(workspace_id),
            )
            .await;
        Ok(owner)
    }

    /// Add `user_id` with `role`, invited by `actor_id`.
    pub async fn add_member(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        role: Role,
        actor_id: Uuid,
        client: &SessionMetadata,
    ) -> AppResult<WorkspaceMembership> {
        let _guard = self.locks.acquire(workspace_id).await;

        let actor = self.actor(workspace_id, actor_id).await?;
        require_permission(&actor, Permission::MembersInvite)?;
        check_grant(actor.role, role)?;
        if self.membership_of(workspace_id, user_id).await?.is_some() {
            return Err(AppError::Conflict(reasons::ALREADY_MEMBER));
        }

        let member = self
            .versions
            .put(WorkspaceMembership::new(
                workspace_id,
                user_id,
                role,
                Some(actor_id),
            ))
            .await?;

        tracing::info!(%workspace_id, %user_id, %role, "Member added");
        self.audit
            .record(
                AuditEvent::new(actions::MEMBER_ADDED, "membership")
                    .actor(actor_id)
                    .workspace(workspace_id)
                    .client(client)
                    .target(user_id)
                    .metadata(serde_json::json!({ "role": role })),
            )
            .await;
        Ok(member)
    }

    /// Change the role of `target_id`.
    ///
    /// The rank rule is checked before the owner-only rule, so a non-owner
    /// promoting to `owner` is told it cannot promote to its rank or higher.
    pub async fn update_role(
        &self,
        workspace_id: Uuid,
        target_id: Uuid,
        new_role: Role,
        actor_id: Uuid,
        client: &SessionMetadata,
    ) -> AppResult<WorkspaceMembership> {
        let _guard = self.locks.acquire(workspace_id).await;

        let actor = self.actor(workspace_id, actor_id).await?;
        require_permission(&actor, Permission::MembersManage)?;
        if actor_id == target_id {
            return Err(AppError::Conflict(reasons::CANNOT_MODIFY_SELF));
        }
        let target = self.get(workspace_id, target_id).await?;
        if !can_modify_member(actor.role, target.role) {
            return Err(AppError::Forbidden(reasons::INSUFFICIENT_RANK));
        }
        check_grant(actor.role, new_role)?;
        if target.is_owner() && new_role != Role::Owner && self.count_owners(workspace_id).await? <= 1
        {
            return Err(AppError::Conflict(reasons::LAST_OWNER));
        }

        let previous = target.role;
        let updated = self.versions.put(target.with_role(new_role)).await?;

        tracing::info!(%workspace_id, %target_id, from = %previous, to = %new_role, "Member role updated");
        self.audit
            .record(
                AuditEvent::new(actions::MEMBER_ROLE_UPDATED, "membership")
                    .actor(actor_id)
                    .workspace(workspace_id)
                    .client(client)
                    .target(target_id)
                    .metadata(serde_json::json!({ "from": previous, "to": new_role })),
            )
            .await;
        Ok(updated)
    }

    /// Remove `target_id` from the workspace and revoke all of their sessions.
    pub async fn remove(
        &self,
        workspace_id: Uuid,
        target_id: Uuid,
        actor_id: Uuid,
        client: &SessionMetadata,
    ) -> AppResult<()> {
        let _guard = self.locks.acquire(workspace_id).await;

        let actor = self.actor(workspace_id, actor_id).await?;
        let target = self.get(workspace_id, target_id).await?;
        if target.is_owner() && self.count_owners(workspace_id).await? <= 1 {
            return Err(AppError::Conflict(reasons::LAST_OWNER));
        }
        if actor_id == target_id {
            return Err(AppError::Conflict(reasons::CANNOT_REMOVE_SELF));
        }
        require_permission(&actor, Permission::MembersRemove)?;
        if target.is_owner() {
            if !actor.is_owner() {
                return Err(AppError::Forbidden(reasons::ONLY_OWNER_CAN_REMOVE_OWNER));
            }
        } else if !can_modify_member(actor.role, target.role) {
            return Err(AppError::Forbidden(reasons::INSUFFICIENT_RANK));
        }

        self.versions.remove(target.removed()).await?;
        // Authorization always reads the membership, so a failed cascade only
        // leaves sessions that no longer grant anything in this workspace.
        if let Err(err) = self.sessions.revoke_all(target_id).await {
            tracing::warn!(%workspace_id, %target_id, error = %err, "Session cascade after removal failed");
        }

        tracing::info!(%workspace_id, %target_id, %actor_id, "Member removed");
        self.audit
            .record(
                AuditEvent::new(actions::MEMBER_REMOVED, "membership")
                    .actor(actor_id)
                    .workspace(workspace_id)
                    .client(client)
                    .target(target_id)
                    .metadata(serde_json::json!({ "role": target.role })),
            )
            .await;
        Ok(())
    }

    /// Leave the workspace. The sole owner cannot leave.
    pub async fn leave(
        &self,
        workspace_id: Uuid,
        actor_id: Uuid,
        client: &SessionMetadata,
    ) -> AppResult<()> {
        let _guard = self.locks.acquire(workspace_id).await;

        let actor = self.actor(workspace_id, actor_id).await?;
        if actor.is_owner() && self.count_owners(workspace_id).await? <= 1 {
            return Err(AppError::Conflict(reasons::LAST_OWNER));
        }

        self.versions.remove(actor.removed()).await?;

        tracing::info!(%workspace_id, %actor_id, "Member left");
        self.audit
            .record(
                AuditEvent::new(actions::MEMBER_LEFT, "membership")
                    .actor(actor_id)
                    .workspace(workspace_id)
                    .client(client)
                    .target(actor_id),
            )
            .await;
        Ok(())
    }

    /// Make `new_owner_id` an owner and demote `actor_id` to admin.
    ///
    /// Two independent writes. The promotion lands first, so a reader between
    /// them sees two owners rather than none.
    pub async fn transfer_ownership(
        &self,
        workspace_id: Uuid,
        actor_id: Uuid,
        new_owner_id: Uuid,
        client: &SessionMetadata,
    ) -> AppResult<(WorkspaceMembership, WorkspaceMembership)> {
        let _guard = self.locks.acquire(workspace_id).await;

        let actor = self.actor(workspace_id, actor_id).await?;
        if !actor.is_owner() {
            return Err(AppError::Forbidden(reasons::ONLY_OWNER_CAN_TRANSFER));
        }
        if actor_id == new_owner_id {
            return Err(AppError::Conflict(reasons::CANNOT_TRANSFER_TO_SELF));
        }
        let target = self.get(workspace_id, new_owner_id).await?;

        let promoted = self.versions.put(target.with_role(Role::Owner)).await?;
        let demoted = self.versions.put(actor.with_role(Role::Admin)).await?;

        tracing::info!(%workspace_id, from = %actor_id, to = %new_owner_id, "Ownership transferred");
        self.audit
            .record(
                AuditEvent::new(actions::OWNERSHIP_TRANSFERRED, "workspace")
                    .actor(actor_id)
                    .workspace(workspace_id)
                    .client(client)
                    .target(new_owner_id),
            )
            .await;
        Ok((demoted, promoted))
    }
}
