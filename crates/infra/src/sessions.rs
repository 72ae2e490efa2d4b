//! Session manager: login, context resolution, space switching, logout.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument, warn};

use atrium_auth::{
    resolve_default, validate_session, AccessError, AccessResult, CurrentContext, Membership,
    MembershipChoice, Session, SessionId,
};
use atrium_core::{Email, MembershipId};

use crate::clock::Clock;
use crate::credentials::{CredentialProof, CredentialVerifier};
use crate::store::AccessStore;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialVerifier>,
    session_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn AccessStore>,
        clock: Arc<dyn Clock>,
        credentials: Arc<dyn CredentialVerifier>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            credentials,
            session_ttl,
        }
    }

    /// Log in with an email and credential.
    ///
    /// The verifier and the person lookup both run on every attempt; every
    /// failure mode collapses into `InvalidCredentials`.
    #[instrument(skip(self, email, proof), err)]
    pub async fn authenticate(&self, email: &str, proof: &CredentialProof) -> AccessResult<Session> {
        let verified = self.credentials.verify(email, proof).await;
        let person = match Email::parse(email) {
            Ok(email) => self.store.find_person_by_email(&email).await?,
            Err(_) => None,
        };

        let Some(person) = person.filter(|_| verified) else {
            warn!("authentication failed");
            return Err(AccessError::InvalidCredentials);
        };

        let memberships = self.store.list_active_memberships(person.id).await?;
        let membership = resolve_default(&memberships).ok_or(AccessError::NoActiveMembership)?;

        let session = self.start_session(membership).await?;
        info!(person_id = %person.id, space = %membership.space, "authenticated");
        Ok(session)
    }

    /// Issue and persist a session bound to `membership`.
    pub async fn start_session(&self, membership: &Membership) -> AccessResult<Session> {
        let session = Session::issue(membership, self.clock.now(), self.session_ttl);
        self.store.insert_session(&session).await?;
        Ok(session)
    }

    /// Resolve the caller behind a session, re-reading the store every time.
    #[instrument(skip(self, id), err)]
    pub async fn current_context(&self, id: &SessionId) -> AccessResult<CurrentContext> {
        let session = self.live_session(id).await?;

        let membership = self
            .store
            .get_membership(session.active_membership_id)
            .await?
            .filter(|m| m.is_active() && m.person_id == session.person_id)
            .ok_or(AccessError::MembershipRevoked)?;

        let person = self
            .store
            .get_person(session.person_id)
            .await?
            .ok_or_else(|| AccessError::Invariant(format!("session person {} missing", session.person_id)))?;

        Ok(CurrentContext {
            session,
            person,
            membership,
        })
    }

    /// Rebind the session to another membership of the same person.
    ///
    /// A missing membership and someone else's membership give the same
    /// `Forbidden`. Switching to the current membership refreshes expiry.
    #[instrument(skip(self, id), fields(target = %target), err)]
    pub async fn switch_space(&self, id: &SessionId, target: MembershipId) -> AccessResult<Session> {
        let session = self.live_session(id).await?;

        let membership = self
            .store
            .get_membership(target)
            .await?
            .filter(|m| m.is_active() && m.person_id == session.person_id)
            .ok_or_else(|| {
                AccessError::Forbidden("membership is not available to this session".to_string())
            })?;

        let expires_at = self.clock.now() + self.session_ttl;
        let switched = self
            .store
            .switch_active_membership(id, session.person_id, membership.id, expires_at)
            .await?
            .ok_or(AccessError::SessionExpired)?;

        info!(
            person_id = %session.person_id,
            from = %session.active_membership_id,
            space = %membership.space,
            "space switched"
        );
        Ok(switched)
    }

    /// All of the person's active memberships, flagging the current one.
    #[instrument(skip(self, id), err)]
    pub async fn list_memberships(&self, id: &SessionId) -> AccessResult<Vec<MembershipChoice>> {
        let session = self.live_session(id).await?;
        let memberships = self.store.list_active_memberships(session.person_id).await?;
        Ok(memberships
            .into_iter()
            .map(|membership| MembershipChoice {
                active: membership.id == session.active_membership_id,
                membership,
            })
            .collect())
    }

    /// Idempotent logout.
    #[instrument(skip(self, id), err)]
    pub async fn invalidate(&self, id: &SessionId) -> AccessResult<()> {
        if self.store.delete_session(id).await? {
            debug!("session invalidated");
        }
        Ok(())
    }

    async fn live_session(&self, id: &SessionId) -> AccessResult<Session> {
        let session = self
            .store
            .get_session(id)
            .await?
            .ok_or(AccessError::SessionExpired)?;
        validate_session(&session, self.clock.now()).map_err(|_| AccessError::SessionExpired)?;
        Ok(session)
    }
}
