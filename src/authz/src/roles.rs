//! Application roles, the role catalog, and stored role lists

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Stored value meaning "grant every known role"
pub const ALL_ROLES_SENTINEL: &str = "all";

/// Application roles a route may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AppRole {
    #[serde(rename = "manage:events")]
    EventsManager,
    #[serde(rename = "manage:siglead")]
    SigleadManager,
    #[serde(rename = "scan:tickets")]
    TicketsScanner,
    #[serde(rename = "manage:tickets")]
    TicketsManager,
    #[serde(rename = "admin:iam")]
    IamAdmin,
    #[serde(rename = "invite:iam")]
    IamInviteOnly,
    #[serde(rename = "manage:links")]
    LinksManager,
    #[serde(rename = "admin:links")]
    LinksAdmin,
    #[serde(rename = "create:stripeLink")]
    StripeLinkCreator,
    #[serde(rename = "bypass:ola")]
    BypassObjectLevelAuth,
    #[serde(rename = "create:roomRequest")]
    RoomRequestCreate,
    #[serde(rename = "update:roomRequest")]
    RoomRequestUpdate,
    #[serde(rename = "view:auditLog")]
    AuditLogViewer,
    #[serde(rename = "manage:orgApiKey")]
    ManageOrgApiKeys,
}

impl AppRole {
    /// Every application role, in declaration order
    pub const ALL: [AppRole; 14] = [
        AppRole::EventsManager,
        AppRole::SigleadManager,
        AppRole::TicketsScanner,
        AppRole::TicketsManager,
        AppRole::IamAdmin,
        AppRole::IamInviteOnly,
        AppRole::LinksManager,
        AppRole::LinksAdmin,
        AppRole::StripeLinkCreator,
        AppRole::BypassObjectLevelAuth,
        AppRole::RoomRequestCreate,
        AppRole::RoomRequestUpdate,
        AppRole::AuditLogViewer,
        AppRole::ManageOrgApiKeys,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::EventsManager => "manage:events",
            AppRole::SigleadManager => "manage:siglead",
            AppRole::TicketsScanner => "scan:tickets",
            AppRole::TicketsManager => "manage:tickets",
            AppRole::IamAdmin => "admin:iam",
            AppRole::IamInviteOnly => "invite:iam",
            AppRole::LinksManager => "manage:links",
            AppRole::LinksAdmin => "admin:links",
            AppRole::StripeLinkCreator => "create:stripeLink",
            AppRole::BypassObjectLevelAuth => "bypass:ola",
            AppRole::RoomRequestCreate => "create:roomRequest",
            AppRole::RoomRequestUpdate => "update:roomRequest",
            AppRole::AuditLogViewer => "view:auditLog",
            AppRole::ManageOrgApiKeys => "manage:orgApiKey",
        }
    }
}

impl fmt::Display for AppRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppRole {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppRole::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| AuthzError::Config(format!("Unknown application role: {}", s)))
    }
}

/// The enumerated universe of valid role identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCatalog {
    roles: BTreeSet<String>,
}

impl RoleCatalog {
    /// Build a catalog from arbitrary role identifiers.
    ///
    /// The sentinel is dropped if present so it can never be granted.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = roles
            .into_iter()
            .map(Into::into)
            .filter(|role| role != ALL_ROLES_SENTINEL)
            .collect();

        Self { roles }
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::new(AppRole::ALL.iter().map(|role| role.as_str()))
    }
}

/// Role list as read from a user or group role record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleList {
    /// Grant every role in the catalog
    AllRoles,
    /// Grant exactly these roles
    Specific(BTreeSet<String>),
}

impl RoleList {
    /// Interpret a stored role list. Exactly `["all"]` is the sentinel.
    pub fn from_stored(roles: Vec<String>) -> Self {
        if roles.len() == 1 && roles[0] == ALL_ROLES_SENTINEL {
            return RoleList::AllRoles;
        }

        RoleList::Specific(roles.into_iter().collect())
    }

    /// Collapse into a concrete role list
    pub fn expand(self, catalog: &RoleCatalog) -> Vec<String> {
        match self {
            RoleList::AllRoles => catalog.roles().iter().cloned().collect(),
            RoleList::Specific(roles) => roles
                .into_iter()
                .filter(|role| role != ALL_ROLES_SENTINEL)
                .collect(),
        }
    }
}
