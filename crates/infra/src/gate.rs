//! Authorization gate service: session → context → decision.

use std::sync::Arc;

use tracing::{debug, instrument};

use atrium_auth::{
    authorize, AccessContext, AccessPolicy, AccessResult, CurrentContext, Decision, Operation,
    ScopeRef, SessionId, Target,
};

use crate::clock::Clock;
use crate::sessions::SessionManager;
use crate::store::AccessStore;

#[derive(Clone)]
pub struct AuthorizationGate {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    sessions: SessionManager,
    policy: Arc<AccessPolicy>,
}

impl AuthorizationGate {
    pub fn new(
        store: Arc<dyn AccessStore>,
        clock: Arc<dyn Clock>,
        sessions: SessionManager,
        policy: Arc<AccessPolicy>,
    ) -> Self {
        Self {
            store,
            clock,
            sessions,
            policy,
        }
    }

    /// Decide on behalf of a session. Vendor assignments are re-read on every
    /// call, so a revoked assignment denies immediately.
    #[instrument(skip(self, session_id, target), fields(op = %op, kind = %target.kind()), err)]
    pub async fn authorize(
        &self,
        session_id: &SessionId,
        op: Operation,
        target: &Target,
    ) -> AccessResult<Decision> {
        let ctx = self.sessions.current_context(session_id).await?;
        self.decide(&ctx, op, target).await
    }

    /// Decide for an already-resolved context.
    pub async fn decide(
        &self,
        ctx: &CurrentContext,
        op: Operation,
        target: &Target,
    ) -> AccessResult<Decision> {
        let access = self.access_context(ctx).await?;
        let decision = authorize(&access, op, target, &self.policy)?;

        match &decision {
            Decision::Allow(_) => debug!(role = %ctx.role(), "access allowed"),
            Decision::Deny(denial) => debug!(
                role = %ctx.role(),
                denial = denial.kind.as_str(),
                "access denied"
            ),
        }
        Ok(decision)
    }

    async fn access_context(&self, ctx: &CurrentContext) -> AccessResult<AccessContext> {
        let access = AccessContext::from_membership(&ctx.membership);
        let ScopeRef::Vendor(vendor_id) = ctx.scope() else {
            return Ok(access);
        };

        let org_id = ctx.org_id();
        let assignments = self
            .store
            .list_active_project_assignments(vendor_id, self.clock.now())
            .await?;
        Ok(access.with_active_projects(
            assignments
                .into_iter()
                .filter(|a| a.org_id == org_id)
                .map(|a| a.project_id),
        ))
    }
}
