//! Role hierarchy, permission table and API key scopes.
//!
//! Everything here is pure and statically constructed. The role table is the only
//! place that decides what a session-authenticated member may do; scopes are the
//! narrower grants carried by API keys and never include ownership.

use serde::{Deserialize, Serialize};

/// Workspace role, strictly ordered `owner > admin > editor > viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl Role {
    /// All roles, highest rank first.
    pub const ALL: [Role; 4] = [Role::Owner, Role::Admin, Role::Editor, Role::Viewer];

    /// Numeric rank; higher outranks lower.
    pub fn rank(self) -> u8 {
        match self {
            Role::Owner => 4,
            Role::Admin => 3,
            Role::Editor => 2,
            Role::Viewer => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "editor" => Some(Self::Editor),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Workspace-level permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "workspace.view")]
    WorkspaceView,
    #[serde(rename = "workspace.settings")]
    WorkspaceSettings,
    #[serde(rename = "workspace.delete")]
    WorkspaceDelete,
    #[serde(rename = "billing.manage")]
    BillingManage,
    #[serde(rename = "members.view")]
    MembersView,
    #[serde(rename = "members.invite")]
    MembersInvite,
    #[serde(rename = "members.manage")]
    MembersManage,
    #[serde(rename = "members.remove")]
    MembersRemove,
    #[serde(rename = "integrations.manage")]
    IntegrationsManage,
    #[serde(rename = "dashboards.view")]
    DashboardsView,
    #[serde(rename = "dashboards.edit")]
    DashboardsEdit,
    #[serde(rename = "analytics.query")]
    AnalyticsQuery,
    #[serde(rename = "data.export")]
    DataExport,
    #[serde(rename = "audit.view")]
    AuditView,
}

impl Permission {
    pub const ALL: [Permission; 14] = [
        Permission::WorkspaceView,
        Permission::WorkspaceSettings,
        Permission::WorkspaceDelete,
        Permission::BillingManage,
        Permission::MembersView,
        Permission::MembersInvite,
        Permission::MembersManage,
        Permission::MembersRemove,
        Permission::IntegrationsManage,
        Permission::DashboardsView,
        Permission::DashboardsEdit,
        Permission::AnalyticsQuery,
        Permission::DataExport,
        Permission::AuditView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkspaceView => "workspace.view",
            Self::WorkspaceSettings => "workspace.settings",
            Self::WorkspaceDelete => "workspace.delete",
            Self::BillingManage => "billing.manage",
            Self::MembersView => "members.view",
            Self::MembersInvite => "members.invite",
            Self::MembersManage => "members.manage",
            Self::MembersRemove => "members.remove",
            Self::IntegrationsManage => "integrations.manage",
            Self::DashboardsView => "dashboards.view",
            Self::DashboardsEdit => "dashboards.edit",
            Self::AnalyticsQuery => "analytics.query",
            Self::DataExport => "data.export",
            Self::AuditView => "audit.view",
        }
    }

    /// Stable reason reported when a role lacks this permission.
    pub fn denial_reason(&self) -> &'static str {
        match self {
            Self::WorkspaceView => "missing permission: workspace.view",
            Self::WorkspaceSettings => "missing permission: workspace.settings",
            Self::WorkspaceDelete => "missing permission: workspace.delete",
            Self::BillingManage => "missing permission: billing.manage",
            Self::MembersView => "missing permission: members.view",
            Self::MembersInvite => "missing permission: members.invite",
            Self::MembersManage => "missing permission: members.manage",
            Self::MembersRemove => "missing permission: members.remove",
            Self::IntegrationsManage => "missing permission: integrations.manage",
            Self::DashboardsView => "missing permission: dashboards.view",
            Self::DashboardsEdit => "missing permission: dashboards.edit",
            Self::AnalyticsQuery => "missing permission: analytics.query",
            Self::DataExport => "missing permission: data.export",
            Self::AuditView => "missing permission: audit.view",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability grantable to an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "events:write")]
    EventsWrite,
    #[serde(rename = "analytics:read")]
    AnalyticsRead,
    #[serde(rename = "dashboards:read")]
    DashboardsRead,
    #[serde(rename = "dashboards:write")]
    DashboardsWrite,
    #[serde(rename = "data:export")]
    DataExport,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "billing:read")]
    BillingRead,
}

impl Scope {
    pub const ALL: [Scope; 7] = [
        Scope::EventsWrite,
        Scope::AnalyticsRead,
        Scope::DashboardsRead,
        Scope::DashboardsWrite,
        Scope::DataExport,
        Scope::AuditRead,
        Scope::BillingRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventsWrite => "events:write",
            Self::AnalyticsRead => "analytics:read",
            Self::DashboardsRead => "dashboards:read",
            Self::DashboardsWrite => "dashboards:write",
            Self::DataExport => "data:export",
            Self::AuditRead => "audit:read",
            Self::BillingRead => "billing:read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Stable reason reported when an API key lacks this scope.
    pub fn denial_reason(&self) -> &'static str {
        match self {
            Self::EventsWrite => "missing scope: events:write",
            Self::AnalyticsRead => "missing scope: analytics:read",
            Self::DashboardsRead => "missing scope: dashboards:read",
            Self::DashboardsWrite => "missing scope: dashboards:write",
            Self::DataExport => "missing scope: data:export",
            Self::AuditRead => "missing scope: audit:read",
            Self::BillingRead => "missing scope: billing:read",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

use Permission as P;

const OWNER_PERMISSIONS: &[Permission] = &P::ALL;

const ADMIN_PERMISSIONS: &[Permission] = &[
    P::WorkspaceView,
    P::WorkspaceSettings,
    P::MembersView,
    P::MembersInvite,
    P::MembersManage,
    P::MembersRemove,
    P::IntegrationsManage,
    P::DashboardsView,
    P::DashboardsEdit,
    P::AnalyticsQuery,
    P::DataExport,
    P::AuditView,
];

const EDITOR_PERMISSIONS: &[Permission] = &[
    P::WorkspaceView,
    P::MembersView,
    P::DashboardsView,
    P::DashboardsEdit,
    P::AnalyticsQuery,
    P::DataExport,
];

const VIEWER_PERMISSIONS: &[Permission] = &[
    P::WorkspaceView,
    P::MembersView,
    P::DashboardsView,
    P::AnalyticsQuery,
];

/// Permission set granted to a role.
pub fn permissions_for(role: Role) -> &'static [Permission] {
    match role {
        Role::Owner => OWNER_PERMISSIONS,
        Role::Admin => ADMIN_PERMISSIONS,
        Role::Editor => EDITOR_PERMISSIONS,
        Role::Viewer => VIEWER_PERMISSIONS,
    }
}

pub fn has_permission(role: Role, permission: Permission) -> bool {
    permissions_for(role).contains(&permission)
}

/// Whether `actor` may modify a member holding `target`.
///
/// Strictly greater rank only: equal ranks never modify each other, owners included.
pub fn can_modify_member(actor: Role, target: Role) -> bool {
    actor.rank() > target.rank()
}

/// Extra permission required to grant `scope`, beyond the right to create keys at all.
pub fn scope_requires_permission(scope: Scope) -> Option<Permission> {
    match scope {
        Scope::EventsWrite | Scope::AnalyticsRead | Scope::DashboardsRead => None,
        Scope::DashboardsWrite => Some(P::DashboardsEdit),
        Scope::DataExport => Some(P::DataExport),
        Scope::AuditRead => Some(P::AuditView),
        Scope::BillingRead => Some(P::BillingManage),
    }
}
