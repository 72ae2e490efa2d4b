//! People and organizations (identity store records).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atrium_core::{DomainError, DomainResult, Email, OrganizationId, PersonId, Slug};

const MAX_DISPLAY_NAME_LEN: usize = 200;

/// An email-addressable human identity.
///
/// # Invariants
/// - `email` is normalised and never changes after creation.
/// - `display_name` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub email: Email,
    pub display_name: String,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Person {
    /// Build a new person; a missing or blank display name falls back to the
    /// email's local part.
    pub fn new(email: Email, display_name: Option<&str>, now: DateTime<Utc>) -> Self {
        let display_name = display_name
            .and_then(|name| normalize_display_name(name).ok())
            .unwrap_or_else(|| email.local_part().to_string());

        Self {
            id: PersonId::new(),
            email,
            display_name,
            avatar: None,
            created_at: now,
        }
    }
}

/// Trim and length-check a display name.
pub fn normalize_display_name(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("display name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(DomainError::validation(format!(
            "display name exceeds {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Tenancy root of the internal space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub slug: Slug,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: &str, slug: Slug, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("organization name cannot be empty"));
        }

        Ok(Self {
            id: OrganizationId::new(),
            name: name.to_string(),
            slug,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_defaults_to_local_part() {
        let email = Email::parse("dana.k@example.com").unwrap();
        let person = Person::new(email.clone(), None, Utc::now());
        assert_eq!(person.display_name, "dana.k");

        let blank = Person::new(email, Some("   "), Utc::now());
        assert_eq!(blank.display_name, "dana.k");
    }

    #[test]
    fn display_name_is_trimmed() {
        let email = Email::parse("dana@example.com").unwrap();
        let person = Person::new(email, Some("  Dana Kim "), Utc::now());
        assert_eq!(person.display_name, "Dana Kim");
    }

    #[test]
    fn organization_requires_name() {
        let slug = Slug::parse("acme").unwrap();
        assert!(Organization::new("  ", slug.clone(), Utc::now()).is_err());
        assert_eq!(Organization::new("Acme", slug, Utc::now()).unwrap().name, "Acme");
    }
}
