use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The closed permission vocabulary a manifest may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "sys:manage")]
    SysManage,
    #[serde(rename = "sys:audit")]
    SysAudit,
    #[serde(rename = "node:read")]
    NodeRead,
    #[serde(rename = "node:cmd")]
    NodeCmd,
    #[serde(rename = "node:join")]
    NodeJoin,
    #[serde(rename = "mfs:write")]
    MfsWrite,
    #[serde(rename = "nats:pub")]
    NatsPub,
    #[serde(rename = "plugin:access")]
    PluginAccess,
}

impl Permission {
    pub const ALL: [Permission; 8] = [
        Permission::SysManage,
        Permission::SysAudit,
        Permission::NodeRead,
        Permission::NodeCmd,
        Permission::NodeJoin,
        Permission::MfsWrite,
        Permission::NatsPub,
        Permission::PluginAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::SysManage => "sys:manage",
            Permission::SysAudit => "sys:audit",
            Permission::NodeRead => "node:read",
            Permission::NodeCmd => "node:cmd",
            Permission::NodeJoin => "node:join",
            Permission::MfsWrite => "mfs:write",
            Permission::NatsPub => "nats:pub",
            Permission::PluginAccess => "plugin:access",
        }
    }

    /// The `namespace` half, used for `namespace:*` wildcard satisfaction.
    pub fn namespace(&self) -> &'static str {
        match self {
            Permission::SysManage | Permission::SysAudit => "sys",
            Permission::NodeRead | Permission::NodeCmd | Permission::NodeJoin => "node",
            Permission::MfsWrite => "mfs",
            Permission::NatsPub => "nats",
            Permission::PluginAccess => "plugin",
        }
    }

    pub fn parse(s: &str) -> Option<Permission> {
        Permission::ALL.iter().copied().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A caller's granted permission set. Entries may be exact permissions,
/// the global wildcard `*`, or a namespace wildcard such as `node:*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(pub BTreeSet<String>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter<I, S>(iter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionSet(iter.into_iter().map(Into::into).collect())
    }

    pub fn insert(&mut self, grant: impl Into<String>) {
        self.0.insert(grant.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True iff the set satisfies `required`: contains `*`, the exact
    /// permission, or the `namespace:*` wildcard derived from it.
    pub fn satisfies(&self, required: Permission) -> bool {
        self.0.contains("*")
            || self.0.contains(required.as_str())
            || self.0.contains(&format!("{}:*", required.namespace()))
    }
}
