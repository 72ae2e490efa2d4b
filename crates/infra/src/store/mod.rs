//! Store contracts for identities, memberships, invitations, sessions and
//! vendor project assignments.
//!
//! ## Error Contract
//!
//! | Situation | `StoreError` | Engine error |
//! |-----------|--------------|--------------|
//! | Unique constraint hit (membership tuple, org slug, email) | `UniqueViolation` | `Conflict` |
//! | Pool closed, timeout, IO, outage | `Unavailable` | `StoreUnavailable` |
//! | Persisted row cannot be decoded | `Corrupt` | `Invariant` |
//! | Any other constraint the database refused | `Rejected` | `Invariant` |
//!
//! A conditional write that matches no row is **not** an error: it is
//! reported as `Ok(None)` / `Ok(false)` so callers can decide what it means.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use atrium_auth::{
    AccessError, Invitation, InvitationToken, Membership, Organization, Person, ProjectAssignment,
    Session, SessionId,
};
use atrium_core::{Email, MembershipId, OrganizationId, PersonId, Slug, VendorId};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AccessError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UniqueViolation(msg) => AccessError::Conflict(msg),
            StoreError::Unavailable(msg) => AccessError::StoreUnavailable(msg),
            StoreError::Corrupt(msg) | StoreError::Rejected(msg) => AccessError::Invariant(msg),
        }
    }
}

/// Partial profile change; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    /// `Some(None)` clears the avatar.
    pub avatar: Option<Option<String>>,
}

/// What a successful redemption provisioned, inside one atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub invitation: Invitation,
    pub person: Person,
    pub membership: Membership,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_person_by_email(&self, email: &Email) -> StoreResult<Option<Person>>;

    async fn get_person(&self, id: PersonId) -> StoreResult<Option<Person>>;

    /// Return the person with `email`, creating it if absent.
    async fn find_or_create_person(
        &self,
        email: &Email,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Person>;

    /// Returns `None` if the person does not exist.
    async fn update_profile(
        &self,
        id: PersonId,
        update: ProfileUpdate,
    ) -> StoreResult<Option<Person>>;

    /// Slug uniqueness violations surface as `UniqueViolation`.
    async fn insert_organization(&self, org: &Organization) -> StoreResult<()>;

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>>;

    async fn find_organization_by_slug(&self, slug: &Slug) -> StoreResult<Option<Organization>>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Non-deactivated memberships, newest first.
    async fn list_active_memberships(&self, person_id: PersonId) -> StoreResult<Vec<Membership>>;

    /// Any membership by id, deactivated or not.
    async fn get_membership(&self, id: MembershipId) -> StoreResult<Option<Membership>>;

    /// An active duplicate of the tuple surfaces as `UniqueViolation`.
    async fn insert_membership(&self, membership: &Membership) -> StoreResult<()>;

    /// `true` if this call deactivated it; `false` if already inactive or missing.
    async fn deactivate_membership(&self, id: MembershipId, now: DateTime<Utc>)
    -> StoreResult<bool>;
}

#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()>;

    async fn get_invitation(&self, token: &InvitationToken) -> StoreResult<Option<Invitation>>;

    /// Atomically consume the invitation (only if unconsumed and
    /// `expires_at > now`), find-or-create the person by email and insert (or
    /// reuse) the active membership. `Ok(None)` when the conditional consume
    /// matched no row.
    async fn redeem_invitation(
        &self,
        token: &InvitationToken,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Provisioned>>;

    /// Delete invitations consumed or expired before `before`.
    async fn purge_invitations(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>>;

    /// Rebind the session, only if it belongs to `person_id`.
    async fn switch_active_membership(
        &self,
        id: &SessionId,
        person_id: PersonId,
        membership_id: MembershipId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;

    /// `true` if a session was removed.
    async fn delete_session(&self, id: &SessionId) -> StoreResult<bool>;

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn list_active_project_assignments(
        &self,
        vendor_id: VendorId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ProjectAssignment>>;

    /// Keyed by `(vendor_id, project_id)`.
    async fn upsert_assignment(&self, assignment: &ProjectAssignment) -> StoreResult<()>;
}

/// Everything the engine needs from persistence.
pub trait AccessStore:
    IdentityStore + MembershipStore + InvitationStore + SessionStore + AssignmentStore
{
}

impl<T> AccessStore for T where
    T: IdentityStore + MembershipStore + InvitationStore + SessionStore + AssignmentStore
{
}
