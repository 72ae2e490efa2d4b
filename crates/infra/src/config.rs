//! Engine configuration loaded from the environment.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use atrium_auth::{AccessPolicy, InvitationLimits};

pub const SESSION_TTL_ENV: &str = "ATRIUM_SESSION_TTL_SECS";
pub const INVITATION_TTL_ENV: &str = "ATRIUM_INVITATION_TTL_SECS";
pub const MAX_INVITATION_TTL_ENV: &str = "ATRIUM_MAX_INVITATION_TTL_SECS";
pub const INVITATION_RETENTION_ENV: &str = "ATRIUM_INVITATION_RETENTION_SECS";
pub const REDEEM_BASE_URL_ENV: &str = "ATRIUM_REDEEM_BASE_URL";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const POLICY_FILE_ENV: &str = "ATRIUM_POLICY_FILE";

const DEFAULT_SESSION_TTL_SECS: i64 = 8 * 60 * 60;
const DEFAULT_INVITATION_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_INVITATION_TTL_SECS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_INVITATION_RETENTION_SECS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_REDEEM_BASE_URL: &str = "http://localhost:3000/invite";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a positive integer number of seconds, got '{value}'")]
    InvalidDuration { key: &'static str, value: String },

    #[error("default invitation ttl ({default}s) exceeds the maximum ({max}s)")]
    InvitationTtlAboveMax { default: i64, max: i64 },

    #[error("failed to read policy file '{path}': {source}")]
    PolicyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy JSON: {0}")]
    PolicyJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub session_ttl_secs: i64,
    pub default_invitation_ttl_secs: i64,
    pub max_invitation_ttl_secs: i64,
    /// How long consumed or expired invitations are kept before the sweeper
    /// deletes them. Until then redemption reports the precise reason.
    pub invitation_retention_secs: i64,
    pub redeem_base_url: String,
    pub database_url: Option<String>,
    pub policy: AccessPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            default_invitation_ttl_secs: DEFAULT_INVITATION_TTL_SECS,
            max_invitation_ttl_secs: DEFAULT_MAX_INVITATION_TTL_SECS,
            invitation_retention_secs: DEFAULT_INVITATION_RETENTION_SECS,
            redeem_base_url: DEFAULT_REDEEM_BASE_URL.to_string(),
            database_url: None,
            policy: AccessPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let session_ttl_secs =
            secs(&lookup, SESSION_TTL_ENV)?.unwrap_or(defaults.session_ttl_secs);
        let default_invitation_ttl_secs =
            secs(&lookup, INVITATION_TTL_ENV)?.unwrap_or(defaults.default_invitation_ttl_secs);
        let max_invitation_ttl_secs =
            secs(&lookup, MAX_INVITATION_TTL_ENV)?.unwrap_or(defaults.max_invitation_ttl_secs);
        let invitation_retention_secs = secs(&lookup, INVITATION_RETENTION_ENV)?
            .unwrap_or(defaults.invitation_retention_secs);
        if default_invitation_ttl_secs > max_invitation_ttl_secs {
            return Err(ConfigError::InvitationTtlAboveMax {
                default: default_invitation_ttl_secs,
                max: max_invitation_ttl_secs,
            });
        }

        let redeem_base_url = match lookup(REDEEM_BASE_URL_ENV) {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => {
                tracing::warn!(
                    default = DEFAULT_REDEEM_BASE_URL,
                    "{REDEEM_BASE_URL_ENV} not set; invitation links use plain http"
                );
                defaults.redeem_base_url
            }
        };

        let policy = match lookup(POLICY_FILE_ENV) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::PolicyFile { path, source })?;
                AccessPolicy::from_json(&raw)?
            }
            None => defaults.policy,
        };

        Ok(Self {
            session_ttl_secs,
            default_invitation_ttl_secs,
            max_invitation_ttl_secs,
            invitation_retention_secs,
            redeem_base_url,
            database_url: lookup(DATABASE_URL_ENV).filter(|url| !url.is_empty()),
            policy,
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl_secs)
    }

    pub fn invitation_limits(&self) -> InvitationLimits {
        InvitationLimits {
            default_ttl: Duration::seconds(self.default_invitation_ttl_secs),
            max_ttl: Duration::seconds(self.max_invitation_ttl_secs),
        }
    }

    pub fn invitation_retention(&self) -> Duration {
        Duration::seconds(self.invitation_retention_secs)
    }

    /// Link embedded in invitation messages.
    pub fn redeem_url(&self, token: &str) -> String {
        let separator = if self.redeem_base_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}token={token}", self.redeem_base_url)
    }
}

fn secs<F>(lookup: &F, key: &'static str) -> Result<Option<i64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Ok(Some(v)),
        _ => Err(ConfigError::InvalidDuration { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.session_ttl(), Duration::hours(8));
        assert_eq!(config.invitation_limits().default_ttl, Duration::days(7));
        assert_eq!(config.invitation_retention(), Duration::days(30));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn values_are_read_from_lookup() {
        let config = EngineConfig::from_lookup(lookup(&[
            (SESSION_TTL_ENV, "60"),
            (INVITATION_RETENTION_ENV, "3600"),
            (REDEEM_BASE_URL_ENV, "https://app.example.com/invite"),
            (DATABASE_URL_ENV, "postgres://localhost/atrium"),
        ]))
        .unwrap();
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.invitation_retention(), Duration::hours(1));
        assert_eq!(
            config.redeem_url("abc"),
            "https://app.example.com/invite?token=abc"
        );
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/atrium"));
    }

    #[test]
    fn bad_durations_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(SESSION_TTL_ENV, "-5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { key: SESSION_TTL_ENV, .. }));

        let err =
            EngineConfig::from_lookup(lookup(&[(INVITATION_RETENTION_ENV, "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { key: INVITATION_RETENTION_ENV, .. }
        ));

        let err = EngineConfig::from_lookup(lookup(&[
            (INVITATION_TTL_ENV, "100"),
            (MAX_INVITATION_TTL_ENV, "50"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvitationTtlAboveMax { .. }));
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let err = EngineConfig::from_lookup(lookup(&[(POLICY_FILE_ENV, "/nonexistent/policy.json")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::PolicyFile { .. }));
    }

    #[test]
    fn redeem_url_respects_existing_query() {
        let config = EngineConfig {
            redeem_base_url: "https://x.test/join?src=mail".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(config.redeem_url("t"), "https://x.test/join?src=mail&token=t");
    }
}
