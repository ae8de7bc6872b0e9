//! Workspace memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::permissions::Role;
use crate::store::Versioned;

/// Namespace for deterministic membership ids.
const MEMBERSHIP_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_4d0c_a5e8_1b2d_3c4f_5a6b);

/// Membership id for a `(workspace, user)` pair; one logical membership per pair.
pub fn membership_id(workspace_id: Uuid, user_id: Uuid) -> Uuid {
    let mut name = [0u8; 32];
    name[..16].copy_from_slice(workspace_id.as_bytes());
    name[16..].copy_from_slice(user_id.as_bytes());
    Uuid::new_v5(&MEMBERSHIP_NAMESPACE, &name)
}

/// Membership stored as versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMembership {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub invited_by: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
    /// Removal marker; a latest version carrying it resolves as absent
    pub removed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceMembership {
    pub fn new(workspace_id: Uuid, user_id: Uuid, role: Role, invited_by: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: membership_id(workspace_id, user_id),
            workspace_id,
            user_id,
            role,
            invited_by,
            joined_at: now,
            removed_at: None,
            updated_at: now,
        }
    }

    /// Next version with a different role.
    pub fn with_role(&self, role: Role) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }

    /// Next version carrying the removal marker.
    pub fn removed(&self) -> Self {
        Self {
            removed_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}

impl Versioned for WorkspaceMembership {
    const KIND: &'static str = "workspace_membership";

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }
}

/// Member as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub role: Role,
    pub invited_by: Option<Uuid>,
    pub joined_at: String,
}

impl From<WorkspaceMembership> for MemberResponse {
    fn from(m: WorkspaceMembership) -> Self {
        Self {
            user_id: m.user_id,
            workspace_id: m.workspace_id,
            role: m.role,
            invited_by: m.invited_by,
            joined_at: m.joined_at.to_rfc3339(),
        }
    }
}

/// Response when a workspace is created.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkspaceCreatedResponse {
    pub workspace_id: Uuid,
    pub owner: MemberResponse,
}

/// Request to add a member.
#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role: Role,
}

/// Request to change a member's role.
#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

/// Request to hand ownership to another member.
#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub new_owner_id: Uuid,
}
