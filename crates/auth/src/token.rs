//! Opaque bearer tokens for invitations and sessions.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Entropy per token, in bytes (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Characters of a token shown by `Debug`.
const DEBUG_PREFIX: usize = 6;

fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

macro_rules! secret_token {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            /// Draw a fresh token from the OS CSPRNG.
            pub fn generate() -> Self {
                Self(generate())
            }

            /// Wrap a token received from a caller.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        // Tokens are bearer secrets: Debug output (and therefore tracing
        // fields using `?`) shows a short prefix only.
        impl core::fmt::Debug for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let prefix: String = self.0.chars().take(DEBUG_PREFIX).collect();
                write!(f, "{}({prefix}…)", stringify!($t))
            }
        }
    };
}

secret_token!(
    /// Single-use invitation token (unrelated to any sequential id).
    InvitationToken
);

secret_token!(
    /// Session identifier handed to the transport as a bearer credential.
    SessionId
);
