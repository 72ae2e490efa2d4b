use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use atrium_auth::AccessResult;

use crate::clock::Clock;
use crate::store::AccessStore;

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub invitations: u64,
}

/// Purge sessions expired at `now`, and invitations that expired or were
/// consumed more than `retention` before `now`.
///
/// Invitations inside the retention window survive so a late redeem still
/// reports `expired` or `already_consumed` rather than `not_found`.
pub async fn sweep_once(
    store: &dyn AccessStore,
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> AccessResult<SweepReport> {
    let sessions = store.purge_expired_sessions(now).await?;
    let invitations = store.purge_invitations(now - retention).await?;
    Ok(SweepReport {
        sessions,
        invitations,
    })
}

/// Handle to stop a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Spawn a background task sweeping every `period`, keeping spent
/// invitations for `retention`.
///
/// Failures are logged and retried on the next tick.
pub fn spawn_sweeper(
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    retention: chrono::Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep_once(store.as_ref(), clock.now(), retention).await {
                        Ok(report) => debug!(
                            sessions = report.sessions,
                            invitations = report.invitations,
                            "sweep finished"
                        ),
                        Err(err) => warn!(error = %err, "sweep failed"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    SweeperHandle {
        shutdown: shutdown_tx,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use atrium_auth::{
        Invitation, InvitationToken, Membership, MembershipGrant, Role, ScopeRef, Session, Space,
    };
    use atrium_core::{Email, OrganizationId, PersonId};

    use crate::clock::ManualClock;
    use crate::store::{InMemoryStore, InvitationStore, SessionStore};

    fn session_at(issued: DateTime<Utc>) -> Session {
        let grant =
            MembershipGrant::new(OrganizationId::new(), Role::Admin, Space::Internal, ScopeRef::Internal)
                .unwrap();
        let membership = Membership::new(PersonId::new(), grant, issued);
        Session::issue(&membership, issued, chrono::Duration::hours(1))
    }

    #[tokio::test]
    async fn sweep_once_removes_expired_sessions() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let live = session_at(now);
        let stale = session_at(now - chrono::Duration::hours(3));
        store.insert_session(&live).await.unwrap();
        store.insert_session(&stale).await.unwrap();

        let report = sweep_once(&store, now, chrono::Duration::days(1)).await.unwrap();
        assert_eq!(report.sessions, 1);
        assert!(store.get_session(&live.id).await.unwrap().is_some());
        assert!(store.get_session(&stale.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invitations_outlive_expiry_by_the_retention_window() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let grant =
            MembershipGrant::new(OrganizationId::new(), Role::Admin, Space::Internal, ScopeRef::Internal)
                .unwrap();
        let lapsed = Invitation {
            token: InvitationToken::generate(),
            email: Email::parse("late@example.com").unwrap(),
            grant,
            invited_by: None,
            created_at: now - chrono::Duration::hours(2),
            expires_at: now - chrono::Duration::hours(1),
            consumed_at: None,
        };
        store.insert_invitation(&lapsed).await.unwrap();

        let report = sweep_once(&store, now, chrono::Duration::days(1)).await.unwrap();
        assert_eq!(report.invitations, 0);
        assert!(store.get_invitation(&lapsed.token).await.unwrap().is_some());

        let later = now + chrono::Duration::days(1);
        let report = sweep_once(&store, later, chrono::Duration::days(1)).await.unwrap();
        assert_eq!(report.invitations, 1);
        assert!(store.get_invitation(&lapsed.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_and_shuts_down() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let stale = session_at(clock.now() - chrono::Duration::hours(3));
        store.insert_session(&stale).await.unwrap();

        let handle = spawn_sweeper(store.clone(), clock, Duration::from_millis(10), chrono::Duration::days(1));
        // The first tick fires immediately.
        for _ in 0..50 {
            if store.get_session(&stale.id).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(store.get_session(&stale.id).await.unwrap().is_none());
    }
}
