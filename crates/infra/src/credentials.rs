//! Credential verification collaborator.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_BYTES: usize = 16;

/// An opaque credential (password, one-time code, ...). Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialProof(String);

impl CredentialProof {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for CredentialProof {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("CredentialProof(***)")
    }
}

/// Checks a proof against the credential registered for an email.
///
/// Implementations must take the same path for unknown emails as for known
/// ones, so timing does not reveal which addresses exist.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, email: &str, proof: &CredentialProof) -> bool;
}

#[derive(Debug, Clone)]
struct Entry {
    salt: [u8; SALT_BYTES],
    digest: [u8; 32],
}

/// Salted SHA-256 credentials held in memory, for tests/dev.
#[derive(Debug)]
pub struct InMemoryCredentials {
    entries: RwLock<HashMap<String, Entry>>,
    decoy: Entry,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        let mut filler = [0u8; 32];
        OsRng.fill_bytes(&mut filler);
        Self {
            entries: RwLock::new(HashMap::new()),
            decoy: Entry {
                salt,
                digest: hash(&salt, &filler),
            },
        }
    }

    /// Register (or replace) the credential for `email`.
    pub fn register(&self, email: &str, secret: &str) {
        let mut salt = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);
        let entry = Entry {
            salt,
            digest: hash(&salt, secret.as_bytes()),
        };
        // Entries are plain values, so a panic elsewhere cannot leave the
        // map half-written; keep using it after poisoning.
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(email), entry);
    }
}

impl Default for InMemoryCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryCredentials {
    async fn verify(&self, email: &str, proof: &CredentialProof) -> bool {
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize(email))
            .cloned();
        let known = found.is_some();
        let entry = found.unwrap_or_else(|| self.decoy.clone());

        let candidate = hash(&entry.salt, proof.expose().as_bytes());
        let matches: bool = candidate[..].ct_eq(&entry.digest[..]).into();
        known & matches
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash(salt: &[u8], secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret);
    hasher.finalize().into()
}
