//! `atrium-auth`: pure membership, invitation, session and gate logic.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod assignment;
pub mod authorize;
pub mod error;
pub mod identity;
pub mod invitation;
pub mod membership;
pub mod policy;
pub mod roles;
pub mod scope;
pub mod session;
pub mod token;

pub use assignment::ProjectAssignment;
pub use authorize::{
    authorize, AccessContext, Decision, Denial, DenialKind, GateError, Predicate, RecordRef, Target,
};
pub use error::{AccessError, AccessResult};
pub use identity::{normalize_display_name, Organization, Person};
pub use invitation::{
    authorize_issuance, InvalidReason, Invitation, InvitationLimits, InvitationRequest,
    InvitationState, ValidationOutcome,
};
pub use membership::{resolve_default, Membership, MembershipChoice, MembershipGrant, MembershipKey};
pub use policy::{AccessPolicy, AllowList, Operation, RecordKind};
pub use roles::{Role, Space};
pub use scope::{check_pairing, PairingError, ScopeRef};
pub use session::{validate_session, CurrentContext, Session, SessionValidationError};
pub use token::{InvitationToken, SessionId, TOKEN_BYTES};
