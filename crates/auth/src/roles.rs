use core::str::FromStr;

use serde::{Deserialize, Serialize};

use atrium_core::DomainError;

/// Top-level context a membership lives in.
///
/// Spaces are mutually exclusive: each role belongs to exactly one of them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Internal,
    Client,
    Vendor,
}

impl Space {
    pub const ALL: [Space; 3] = [Space::Internal, Space::Client, Space::Vendor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Space::Internal => "internal",
            Space::Client => "client",
            Space::Vendor => "vendor",
        }
    }
}

impl core::fmt::Display for Space {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Space {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Space::ALL
            .into_iter()
            .find(|space| space.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown space '{s}'")))
    }
}

/// Role held within a membership.
///
/// Roles are distinct capability sets, not hierarchical flags: `admin` does
/// not imply `finance`, and `client_admin` does not imply anything outside
/// its account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Sales,
    Delivery,
    Finance,
    ClientAdmin,
    ClientMember,
    Vendor,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Admin,
        Role::Sales,
        Role::Delivery,
        Role::Finance,
        Role::ClientAdmin,
        Role::ClientMember,
        Role::Vendor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Sales => "sales",
            Role::Delivery => "delivery",
            Role::Finance => "finance",
            Role::ClientAdmin => "client_admin",
            Role::ClientMember => "client_member",
            Role::Vendor => "vendor",
        }
    }

    /// The only space this role may be held in.
    pub fn space(&self) -> Space {
        match self {
            Role::Admin | Role::Sales | Role::Delivery | Role::Finance => Space::Internal,
            Role::ClientAdmin | Role::ClientMember => Space::Client,
            Role::Vendor => Space::Vendor,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown role '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_parses_back_from_its_name() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn serde_names_match_as_str() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
        for space in Space::ALL {
            let json = serde_json::to_string(&space).unwrap();
            assert_eq!(json, format!("\"{}\"", space.as_str()));
        }
    }

    #[test]
    fn internal_roles_live_in_internal_space() {
        assert_eq!(Role::Finance.space(), Space::Internal);
        assert_eq!(Role::ClientMember.space(), Space::Client);
        assert_eq!(Role::Vendor.space(), Space::Vendor);
    }
}
