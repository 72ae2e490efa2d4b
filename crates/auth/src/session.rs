use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use atrium_core::{MembershipId, OrganizationId, PersonId};

use crate::{Membership, Person, Role, ScopeRef, SessionId, Space};

/// A live login bound to exactly one active membership.
///
/// Transport-agnostic: the id is handed to whatever layer carries it
/// (cookie, bearer header). Switching spaces rebinds the same session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub person_id: PersonId,
    pub active_membership_id: MembershipId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Issue a fresh session for `membership` with a random id.
    pub fn issue(membership: &Membership, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: SessionId::generate(),
            person_id: membership.person_id,
            active_membership_id: membership.id,
            issued_at: now,
            expires_at: now + ttl,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionValidationError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate a session's time window.
///
/// This checks timing only; membership liveness is verified separately
/// against the store on every request.
pub fn validate_session(session: &Session, now: DateTime<Utc>) -> Result<(), SessionValidationError> {
    if session.expires_at <= session.issued_at {
        return Err(SessionValidationError::InvalidTimeWindow);
    }
    if now < session.issued_at {
        return Err(SessionValidationError::NotYetValid);
    }
    if now >= session.expires_at {
        return Err(SessionValidationError::Expired);
    }
    Ok(())
}

/// The resolved caller: session, person and the active membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentContext {
    pub session: Session,
    pub person: Person,
    pub membership: Membership,
}

impl CurrentContext {
    pub fn org_id(&self) -> OrganizationId {
        self.membership.org_id
    }

    pub fn role(&self) -> Role {
        self.membership.role
    }

    pub fn space(&self) -> Space {
        self.membership.space
    }

    pub fn scope(&self) -> ScopeRef {
        self.membership.scope
    }
}
