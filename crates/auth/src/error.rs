use thiserror::Error;

use atrium_core::DomainError;

use crate::authorize::GateError;
use crate::invitation::InvalidReason;
use crate::scope::PairingError;

/// Engine-level error taxonomy.
///
/// Denials from the gate are not errors; they are `Decision::Deny` values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Deliberately undifferentiated: unknown email, bad email and wrong
    /// credential all look the same.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("session expired")]
    SessionExpired,

    #[error("membership revoked")]
    MembershipRevoked,

    #[error("no active membership")]
    NoActiveMembership,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invitation not found")]
    InvitationNotFound,

    #[error("invitation expired")]
    InvitationExpired,

    #[error("invitation already redeemed")]
    AlreadyRedeemed,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Gate(#[from] GateError),
}

impl AccessError {
    /// Stable snake_case code for transport mapping.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::InvalidCredentials => "invalid_credentials",
            AccessError::SessionExpired => "session_expired",
            AccessError::MembershipRevoked => "membership_revoked",
            AccessError::NoActiveMembership => "no_active_membership",
            AccessError::Conflict(_) => "conflict",
            AccessError::Invariant(_) => "invariant",
            AccessError::NotFound(_) => "not_found",
            AccessError::InvitationNotFound => "invitation_not_found",
            AccessError::InvitationExpired => "invitation_expired",
            AccessError::AlreadyRedeemed => "already_redeemed",
            AccessError::Forbidden(_) => "forbidden",
            AccessError::Validation(_) => "validation",
            AccessError::StoreUnavailable(_) => "store_unavailable",
            AccessError::Gate(GateError::UnknownOperation(_)) => "unknown_operation",
            AccessError::Gate(GateError::MissingMarker { .. }) => "missing_marker",
        }
    }

    /// The invitation reason behind an invitation error, if any.
    pub fn invitation_reason(&self) -> Option<InvalidReason> {
        match self {
            AccessError::InvitationNotFound => Some(InvalidReason::NotFound),
            AccessError::InvitationExpired => Some(InvalidReason::Expired),
            AccessError::AlreadyRedeemed => Some(InvalidReason::AlreadyConsumed),
            _ => None,
        }
    }
}

impl From<DomainError> for AccessError {
    fn from(value: DomainError) -> Self {
        AccessError::Validation(value.to_string())
    }
}

impl From<PairingError> for AccessError {
    fn from(value: PairingError) -> Self {
        AccessError::Invariant(value.to_string())
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, Space};

    #[test]
    fn invitation_errors_expose_reason() {
        for reason in [
            InvalidReason::NotFound,
            InvalidReason::Expired,
            InvalidReason::AlreadyConsumed,
        ] {
            let err = AccessError::from(reason);
            assert_eq!(err.invitation_reason(), Some(reason));
        }
        assert_eq!(AccessError::SessionExpired.invitation_reason(), None);
    }

    #[test]
    fn pairing_errors_are_invariants() {
        let err = AccessError::from(PairingError::RoleSpace {
            role: Role::Vendor,
            expected: Space::Vendor,
            actual: Space::Client,
        });
        assert_eq!(err.code(), "invariant");
    }

    #[test]
    fn domain_errors_are_validation() {
        let err = AccessError::from(DomainError::validation("bad email"));
        assert_eq!(err.code(), "validation");
        assert!(err.to_string().contains("bad email"));
    }
}
