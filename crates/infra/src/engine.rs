//! `AccessEngine`: the inbound interface, wiring stores and services together.

use std::sync::Arc;

use tracing::{info, instrument};

use atrium_auth::{
    normalize_display_name, AccessError, AccessResult, CurrentContext, Decision, InvitationRequest,
    InvitationToken, Membership, MembershipChoice, Operation, Organization, Person,
    ProjectAssignment, Role, ScopeRef, Session, SessionId, Space, Target, ValidationOutcome,
};
use atrium_core::{MembershipId, OrganizationId, PersonId, Slug};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::credentials::{CredentialProof, CredentialVerifier, InMemoryCredentials};
use crate::gate::AuthorizationGate;
use crate::invitations::{InvitationService, IssuedInvitation, Issuer, Redemption};
use crate::notify::{LogNotifier, Notifier};
use crate::registry::MembershipRegistry;
use crate::sessions::SessionManager;
use crate::store::{AccessStore, ProfileUpdate, StoreError};
use crate::sweeper::{sweep_once, SweepReport};

pub struct AccessEngineBuilder {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialVerifier>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl AccessEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialVerifier>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> AccessEngine {
        let config = Arc::new(self.config);
        let policy = Arc::new(config.policy.clone());

        let registry = MembershipRegistry::new(self.store.clone(), self.clock.clone());
        let sessions = SessionManager::new(
            self.store.clone(),
            self.clock.clone(),
            self.credentials,
            config.session_ttl(),
        );
        let invitations = InvitationService::new(
            self.store.clone(),
            self.clock.clone(),
            self.notifier,
            sessions.clone(),
            config.clone(),
        );
        let gate = AuthorizationGate::new(
            self.store.clone(),
            self.clock.clone(),
            sessions.clone(),
            policy,
        );

        AccessEngine {
            store: self.store,
            clock: self.clock,
            config,
            registry,
            sessions,
            invitations,
            gate,
        }
    }
}

/// Facade over the registry, invitation, session and gate services.
///
/// Cheap to clone; every clone shares the same store.
#[derive(Clone)]
pub struct AccessEngine {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    registry: MembershipRegistry,
    sessions: SessionManager,
    invitations: InvitationService,
    gate: AuthorizationGate,
}

impl AccessEngine {
    /// Start building an engine over `store` with system clock, log notifier,
    /// empty credential set and default config.
    pub fn builder(store: Arc<dyn AccessStore>) -> AccessEngineBuilder {
        AccessEngineBuilder {
            store,
            clock: Arc::new(SystemClock),
            credentials: Arc::new(InMemoryCredentials::new()),
            notifier: Arc::new(LogNotifier),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    pub async fn authenticate(&self, email: &str, proof: &CredentialProof) -> AccessResult<Session> {
        self.sessions.authenticate(email, proof).await
    }

    pub async fn current_context(&self, session: &SessionId) -> AccessResult<CurrentContext> {
        self.sessions.current_context(session).await
    }

    pub async fn switch_space(
        &self,
        session: &SessionId,
        membership_id: MembershipId,
    ) -> AccessResult<Session> {
        self.sessions.switch_space(session, membership_id).await
    }

    pub async fn list_memberships(&self, session: &SessionId) -> AccessResult<Vec<MembershipChoice>> {
        self.sessions.list_memberships(session).await
    }

    pub async fn logout(&self, session: &SessionId) -> AccessResult<()> {
        self.sessions.invalidate(session).await
    }

    /// Change the caller's own display name and/or avatar.
    #[instrument(skip(self, session, update), err)]
    pub async fn update_profile(
        &self,
        session: &SessionId,
        mut update: ProfileUpdate,
    ) -> AccessResult<Person> {
        let ctx = self.sessions.current_context(session).await?;
        if let Some(name) = update.display_name.take() {
            update.display_name = Some(normalize_display_name(&name)?);
        }
        self.store
            .update_profile(ctx.person.id, update)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("person {}", ctx.person.id)))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Invitations
    // ─────────────────────────────────────────────────────────────────────

    /// Issue on behalf of the member behind `session`.
    pub async fn issue_invitation(
        &self,
        session: &SessionId,
        request: InvitationRequest,
    ) -> AccessResult<IssuedInvitation> {
        let issuer = Issuer::from(self.sessions.current_context(session).await?);
        self.invitations.issue(&issuer, request).await
    }

    /// Issue without an inviting member (bootstrap and operator tooling).
    pub async fn issue_system_invitation(
        &self,
        request: InvitationRequest,
    ) -> AccessResult<IssuedInvitation> {
        self.invitations.issue(&Issuer::System, request).await
    }

    pub async fn validate_invitation(&self, token: &InvitationToken) -> AccessResult<ValidationOutcome> {
        self.invitations.validate(token).await
    }

    pub async fn redeem_invitation(
        &self,
        token: &InvitationToken,
        display_name: Option<&str>,
    ) -> AccessResult<Redemption> {
        self.invitations.redeem(token, display_name).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────

    pub async fn authorize(
        &self,
        session: &SessionId,
        op: Operation,
        target: &Target,
    ) -> AccessResult<Decision> {
        self.gate.authorize(session, op, target).await
    }

    /// As [`authorize`](Self::authorize), with the operation given by name.
    pub async fn authorize_named(
        &self,
        session: &SessionId,
        op: &str,
        target: &Target,
    ) -> AccessResult<Decision> {
        let op: Operation = op.parse()?;
        self.gate.authorize(session, op, target).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_membership(
        &self,
        person_id: PersonId,
        org_id: OrganizationId,
        role: Role,
        space: Space,
        scope: ScopeRef,
    ) -> AccessResult<Membership> {
        self.registry
            .create_membership(person_id, org_id, role, space, scope)
            .await
    }

    pub async fn deactivate_membership(&self, id: MembershipId) -> AccessResult<()> {
        self.registry.deactivate_membership(id).await
    }

    /// Return the organization with `slug`, creating it if needed.
    #[instrument(skip(self, name), err)]
    pub async fn ensure_organization(&self, name: &str, slug: &str) -> AccessResult<Organization> {
        let slug = Slug::parse(slug)?;
        if let Some(existing) = self.store.find_organization_by_slug(&slug).await? {
            return Ok(existing);
        }

        let org = Organization::new(name, slug.clone(), self.clock.now())?;
        match self.store.insert_organization(&org).await {
            Ok(()) => {
                info!(org_id = %org.id, "organization created");
                Ok(org)
            }
            // Created concurrently; take the winner.
            Err(StoreError::UniqueViolation(_)) => self
                .store
                .find_organization_by_slug(&slug)
                .await?
                .ok_or_else(|| AccessError::Conflict(format!("organization slug '{slug}'"))),
            Err(e) => Err(e.into()),
        }
    }

    /// Record (or update) a vendor's project assignment.
    #[instrument(
        skip(self, assignment),
        fields(vendor_id = %assignment.vendor_id, project_id = %assignment.project_id),
        err
    )]
    pub async fn record_assignment(&self, assignment: &ProjectAssignment) -> AccessResult<()> {
        self.store.upsert_assignment(assignment).await?;
        Ok(())
    }

    /// Purge expired sessions, and invitations spent longer ago than the
    /// configured retention, once.
    pub async fn sweep(&self) -> AccessResult<SweepReport> {
        sweep_once(
            self.store.as_ref(),
            self.clock.now(),
            self.config.invitation_retention(),
        )
        .await
    }
}
