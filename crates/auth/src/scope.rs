use serde::{Deserialize, Serialize};
use thiserror::Error;

use atrium_core::{AccountId, ValueObject, VendorId};

use crate::{Role, Space};

/// Tenancy-narrowing reference of a membership.
///
/// Internal memberships see the whole organization; client memberships are
/// narrowed to one account; vendor memberships to one vendor (whose visible
/// projects are derived from assignments at read time).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScopeRef {
    Internal,
    Account(AccountId),
    Vendor(VendorId),
}

impl ValueObject for ScopeRef {}

impl ScopeRef {
    /// The space this scope shape belongs to.
    pub fn space(&self) -> Space {
        match self {
            ScopeRef::Internal => Space::Internal,
            ScopeRef::Account(_) => Space::Client,
            ScopeRef::Vendor(_) => Space::Vendor,
        }
    }

    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            ScopeRef::Account(id) => Some(*id),
            _ => None,
        }
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        match self {
            ScopeRef::Vendor(id) => Some(*id),
            _ => None,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ScopeRef::Internal => "internal",
            ScopeRef::Account(_) => "account",
            ScopeRef::Vendor(_) => "vendor",
        }
    }
}

impl core::fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ScopeRef::Internal => f.write_str("internal"),
            ScopeRef::Account(id) => write!(f, "account:{id}"),
            ScopeRef::Vendor(id) => write!(f, "vendor:{id}"),
        }
    }
}

/// Role, space and scope do not line up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("role '{role}' belongs to the {expected} space, not {actual}")]
    RoleSpace {
        role: Role,
        expected: Space,
        actual: Space,
    },

    #[error("{space} space requires a {expected} scope, got {actual}")]
    ScopeSpace {
        space: Space,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Check the standing role/space/scope correlation.
pub fn check_pairing(role: Role, space: Space, scope: &ScopeRef) -> Result<(), PairingError> {
    if role.space() != space {
        return Err(PairingError::RoleSpace {
            role,
            expected: role.space(),
            actual: space,
        });
    }

    if scope.space() != space {
        let expected = match space {
            Space::Internal => "internal",
            Space::Client => "account",
            Space::Vendor => "vendor",
        };
        return Err(PairingError::ScopeSpace {
            space,
            expected,
            actual: scope.kind_str(),
        });
    }

    Ok(())
}
