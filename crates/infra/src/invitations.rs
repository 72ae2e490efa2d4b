//! Invitation issuer/redeemer.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use atrium_auth::{
    authorize_issuance, normalize_display_name, AccessError, AccessPolicy, AccessResult,
    CurrentContext, InvalidReason, Invitation, InvitationLimits, InvitationRequest,
    InvitationToken, Membership, Person, Session, ValidationOutcome,
};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::notify::Notifier;
use crate::sessions::SessionManager;
use crate::store::AccessStore;

/// Who is handing out an invitation.
#[derive(Debug, Clone)]
pub enum Issuer {
    /// A logged-in member; subject to issuance rules.
    Member(Box<CurrentContext>),
    /// Trusted internal caller (bootstrap, operators).
    System,
}

impl From<CurrentContext> for Issuer {
    fn from(value: CurrentContext) -> Self {
        Issuer::Member(Box::new(value))
    }
}

/// Non-fatal problems encountered while issuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueWarning {
    NotificationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub redeem_url: String,
    pub warnings: Vec<IssueWarning>,
}

/// Everything a successful redemption yields: the caller is logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub person: Person,
    pub membership: Membership,
    pub session: Session,
}

#[derive(Clone)]
pub struct InvitationService {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sessions: SessionManager,
    config: Arc<EngineConfig>,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn AccessStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        sessions: SessionManager,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            sessions,
            config,
        }
    }

    fn policy(&self) -> &AccessPolicy {
        &self.config.policy
    }

    fn limits(&self) -> InvitationLimits {
        self.config.invitation_limits()
    }

    /// Validate, authorize, persist and announce a new invitation.
    ///
    /// Delivery failures are reported as warnings; the invitation stays valid.
    #[instrument(
        skip(self, issuer, request),
        fields(org_id = %request.org_id, role = %request.role),
        err
    )]
    pub async fn issue(
        &self,
        issuer: &Issuer,
        request: InvitationRequest,
    ) -> AccessResult<IssuedInvitation> {
        let invited_by = match issuer {
            Issuer::Member(ctx) => Some(ctx.person.id),
            Issuer::System => None,
        };
        let invitation = request.into_invitation(invited_by, &self.limits(), self.clock.now())?;

        if let Issuer::Member(ctx) = issuer {
            authorize_issuance(&ctx.membership, &invitation.grant, self.policy())?;
        }
        if self
            .store
            .get_organization(invitation.grant.org_id)
            .await?
            .is_none()
        {
            return Err(AccessError::NotFound(format!(
                "organization {}",
                invitation.grant.org_id
            )));
        }

        self.store.insert_invitation(&invitation).await?;

        let redeem_url = self.config.redeem_url(invitation.token.as_str());
        let mut warnings = Vec::new();
        if let Err(e) = self
            .notifier
            .send_invitation_message(&invitation.email, &redeem_url, invitation.expires_at)
            .await
        {
            warn!(error = %e, email = %invitation.email, "invitation notification failed");
            warnings.push(IssueWarning::NotificationFailed(e.to_string()));
        }

        info!(
            email = %invitation.email,
            scope = %invitation.grant.scope,
            expires_at = %invitation.expires_at,
            "invitation issued"
        );
        Ok(IssuedInvitation {
            invitation,
            redeem_url,
            warnings,
        })
    }

    /// Read-only check of a token.
    #[instrument(skip(self, token), err)]
    pub async fn validate(&self, token: &InvitationToken) -> AccessResult<ValidationOutcome> {
        let invitation = self.store.get_invitation(token).await?;
        Ok(ValidationOutcome::evaluate(invitation, self.clock.now()))
    }

    /// Consume a token, provision the person and membership, and log them in.
    #[instrument(skip(self, token, display_name), err)]
    pub async fn redeem(
        &self,
        token: &InvitationToken,
        display_name: Option<&str>,
    ) -> AccessResult<Redemption> {
        let display_name = match display_name {
            Some(name) if !name.trim().is_empty() => Some(normalize_display_name(name)?),
            _ => None,
        };

        let outcome = self.validate(token).await?;
        if let Some(reason) = outcome.reason {
            return Err(reason.into());
        }

        let Some(provisioned) = self
            .store
            .redeem_invitation(token, display_name.as_deref(), self.clock.now())
            .await?
        else {
            // Lost the race, or the window closed since the check above.
            let reason = match self.store.get_invitation(token).await? {
                Some(invitation) => invitation
                    .check_redeemable(self.clock.now())
                    .err()
                    .unwrap_or(InvalidReason::AlreadyConsumed),
                None => InvalidReason::NotFound,
            };
            return Err(match reason {
                InvalidReason::Expired => AccessError::InvitationExpired,
                InvalidReason::NotFound => AccessError::InvitationNotFound,
                InvalidReason::AlreadyConsumed => AccessError::AlreadyRedeemed,
            });
        };

        let session = self.sessions.start_session(&provisioned.membership).await?;
        info!(
            person_id = %provisioned.person.id,
            membership_id = %provisioned.membership.id,
            "invitation redeemed"
        );
        Ok(Redemption {
            person: provisioned.person,
            membership: provisioned.membership,
            session,
        })
    }
}
