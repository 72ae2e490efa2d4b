//! Infrastructure layer: stores, config, notification, and the access services.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod gate;
pub mod invitations;
pub mod notify;
pub mod registry;
pub mod sessions;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use credentials::{CredentialProof, CredentialVerifier, InMemoryCredentials};
pub use engine::{AccessEngine, AccessEngineBuilder};
pub use gate::AuthorizationGate;
pub use invitations::{InvitationService, IssueWarning, IssuedInvitation, Issuer, Redemption};
pub use notify::{LogNotifier, Notifier, NotifyError, OutboxMessage, OutboxNotifier};
pub use registry::MembershipRegistry;
pub use sessions::SessionManager;
pub use store::{AccessStore, InMemoryStore, PostgresStore, ProfileUpdate, StoreError};
pub use sweeper::{spawn_sweeper, sweep_once, SweepReport, SweeperHandle};
