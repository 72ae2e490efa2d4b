//! `atrium-core`: identifiers and value objects shared by the engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, MembershipId, OrganizationId, PersonId, ProjectId, VendorId};
pub use value_object::{Email, Slug, ValueObject};
