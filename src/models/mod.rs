//! Domain models: versioned entities and their request/response shapes.

pub mod api_key;
pub mod membership;
pub mod password_reset;
pub mod session;
pub mod user;

// Re-export commonly used types
pub use api_key::{
    ApiKey, ApiKeyCreateResponse, ApiKeyListItem, ApiKeyStatus, ApiKeyUsage, CreateApiKeyRequest,
};
pub use membership::{
    AddMemberRequest, MemberResponse, TransferOwnershipRequest, UpdateRoleRequest,
    WorkspaceCreatedResponse, WorkspaceMembership, membership_id,
};
pub use password_reset::PasswordReset;
pub use session::{LoginResponse, Session, SessionMetadata};
pub use user::{
    ChangePasswordRequest, LoginRequest, PasswordResetConfirm, PasswordResetRequest,
    SignupRequest, User, UserResponse, UserStatus,
};
