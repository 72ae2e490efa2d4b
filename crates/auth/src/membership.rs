//! Memberships: a person's grant of one role within one space and scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atrium_core::{MembershipId, OrganizationId, PersonId};

use crate::scope::{check_pairing, PairingError};
use crate::{Role, ScopeRef, Space};

/// The "what" of a membership, independent of who holds it.
///
/// Invitations carry a grant; redeeming one turns it into a `Membership`.
/// A grant can only be constructed with a consistent role/space/scope.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipGrant {
    pub org_id: OrganizationId,
    pub role: Role,
    pub space: Space,
    pub scope: ScopeRef,
}

impl MembershipGrant {
    pub fn new(
        org_id: OrganizationId,
        role: Role,
        space: Space,
        scope: ScopeRef,
    ) -> Result<Self, PairingError> {
        check_pairing(role, space, &scope)?;
        Ok(Self {
            org_id,
            role,
            space,
            scope,
        })
    }

    /// Re-check the pairing (grants may arrive deserialized from storage).
    pub fn validate(&self) -> Result<(), PairingError> {
        check_pairing(self.role, self.space, &self.scope)
    }
}

/// Uniqueness key of an active membership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MembershipKey {
    pub person_id: PersonId,
    pub grant: MembershipGrant,
}

/// A persisted grant held by one person.
///
/// # Invariants
/// - `(person_id, org_id, role, space, scope)` is unique among active memberships.
/// - `role`, `space` and `scope` are consistent (see [`check_pairing`]).
/// - Never mutated except for the one-way `deactivated_at` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub person_id: PersonId,
    pub org_id: OrganizationId,
    pub role: Role,
    pub space: Space,
    pub scope: ScopeRef,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Membership {
    /// Materialise a grant for a person.
    pub fn new(person_id: PersonId, grant: MembershipGrant, now: DateTime<Utc>) -> Self {
        Self {
            id: MembershipId::new(),
            person_id,
            org_id: grant.org_id,
            role: grant.role,
            space: grant.space,
            scope: grant.scope,
            created_at: now,
            deactivated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }

    pub fn grant(&self) -> MembershipGrant {
        MembershipGrant {
            org_id: self.org_id,
            role: self.role,
            space: self.space,
            scope: self.scope,
        }
    }

    pub fn key(&self) -> MembershipKey {
        MembershipKey {
            person_id: self.person_id,
            grant: self.grant(),
        }
    }
}

/// A membership as offered in a space picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChoice {
    pub membership: Membership,
    pub active: bool,
}

/// Pick the membership a fresh login lands in.
///
/// Active memberships only. Internal space wins; otherwise (and among several
/// internal ones) the most recently created wins. Equal timestamps fall back
/// to the greater id, so the result never depends on iteration order.
pub fn resolve_default<'a, I>(memberships: I) -> Option<&'a Membership>
where
    I: IntoIterator<Item = &'a Membership>,
{
    memberships
        .into_iter()
        .filter(|m| m.is_active())
        .max_by_key(|m| (m.space == Space::Internal, m.created_at, m.id))
}
