use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::authorize::GateError;
use crate::Role;

/// Record-kind identifier.
///
/// Kinds are modeled as opaque strings (e.g. "invoice"). The engine never
/// interprets them beyond looking them up in an [`AccessPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKind(Cow<'static, str>);

impl RecordKind {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of operations the gate decides on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Read,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Operation {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| GateError::UnknownOperation(s.to_string()))
    }
}

/// Allow-list: record kind → permitted operations.
pub type AllowList = BTreeMap<RecordKind, BTreeSet<Operation>>;

/// Configuration consulted by the gate.
///
/// Internal memberships see their whole organization. Client and vendor
/// memberships are denied by default and widened by their allow-lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    pub client_admin: AllowList,
    pub client_member: AllowList,
    pub vendor: AllowList,
    /// Lets `client_admin` invite people into its own account.
    pub client_admin_can_invite: bool,
    /// Hides a vendor's own profile data once it has no active assignment.
    pub vendor_profile_requires_assignment: bool,
}

impl AccessPolicy {
    /// A policy with empty allow-lists.
    pub fn empty() -> Self {
        Self {
            client_admin: AllowList::new(),
            client_member: AllowList::new(),
            vendor: AllowList::new(),
            client_admin_can_invite: false,
            vendor_profile_requires_assignment: false,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Add `ops` on `kind` to the allow-list of a client or vendor role.
    ///
    /// Internal roles have no allow-list; passing one is a no-op.
    pub fn allow(
        mut self,
        role: Role,
        kind: impl Into<Cow<'static, str>>,
        ops: impl IntoIterator<Item = Operation>,
    ) -> Self {
        let kind = RecordKind::new(kind);
        if let Some(list) = self.allow_list_mut(role) {
            list.entry(kind).or_default().extend(ops);
        }
        self
    }

    pub fn allow_list(&self, role: Role) -> Option<&AllowList> {
        match role {
            Role::ClientAdmin => Some(&self.client_admin),
            Role::ClientMember => Some(&self.client_member),
            Role::Vendor => Some(&self.vendor),
            Role::Admin | Role::Sales | Role::Delivery | Role::Finance => None,
        }
    }

    fn allow_list_mut(&mut self, role: Role) -> Option<&mut AllowList> {
        match role {
            Role::ClientAdmin => Some(&mut self.client_admin),
            Role::ClientMember => Some(&mut self.client_member),
            Role::Vendor => Some(&mut self.vendor),
            Role::Admin | Role::Sales | Role::Delivery | Role::Finance => None,
        }
    }

    /// Whether an allow-listed (client/vendor) role may perform `op` on `kind`.
    pub fn allows(&self, role: Role, kind: &RecordKind, op: Operation) -> bool {
        self.allow_list(role)
            .and_then(|list| list.get(kind))
            .is_some_and(|ops| ops.contains(&op))
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        use Operation::*;

        Self::empty()
            .allow(Role::ClientAdmin, "project", [Read, Update])
            .allow(Role::ClientAdmin, "invoice", [Read])
            .allow(Role::ClientAdmin, "message", [Read, Create, Update])
            .allow(Role::ClientAdmin, "deal", [Read])
            .allow(Role::ClientMember, "project", [Read])
            .allow(Role::ClientMember, "message", [Read, Create])
            .allow(Role::Vendor, "project", [Read])
            .allow(Role::Vendor, "task", [Read, Update])
            .allow(Role::Vendor, "message", [Read, Create])
            .allow(Role::Vendor, "vendor_profile", [Read, Update])
    }
}
