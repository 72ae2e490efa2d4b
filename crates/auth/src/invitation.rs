//! Invitations: single-use, expiring tokens that provision a membership.
//!
//! ```text
//! Pending ──redeem──▶ Redeemed   (terminal, consumed_at set exactly once)
//!    │
//!    └──now >= expires_at──▶ Expired   (terminal, evaluated at read time)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use atrium_core::{Email, OrganizationId, PersonId};

use crate::policy::AccessPolicy;
use crate::{AccessError, InvitationToken, Membership, MembershipGrant, Role, ScopeRef, Space};

/// Lifecycle state of an invitation at a given instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationState {
    Pending,
    Redeemed,
    Expired,
}

/// Why a token cannot be redeemed. Precise enough for UI messaging.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NotFound,
    Expired,
    AlreadyConsumed,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::NotFound => "not_found",
            InvalidReason::Expired => "expired",
            InvalidReason::AlreadyConsumed => "already_consumed",
        }
    }
}

impl From<InvalidReason> for AccessError {
    fn from(value: InvalidReason) -> Self {
        match value {
            InvalidReason::NotFound => AccessError::InvitationNotFound,
            InvalidReason::Expired => AccessError::InvitationExpired,
            InvalidReason::AlreadyConsumed => AccessError::AlreadyRedeemed,
        }
    }
}

/// A prospective membership for `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub token: InvitationToken,
    pub email: Email,
    #[serde(flatten)]
    pub grant: MembershipGrant,
    pub invited_by: Option<PersonId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn state_at(&self, now: DateTime<Utc>) -> InvitationState {
        if self.consumed_at.is_some() {
            InvitationState::Redeemed
        } else if now >= self.expires_at {
            InvitationState::Expired
        } else {
            InvitationState::Pending
        }
    }

    /// Consumption is reported before expiry: a used token says "already used"
    /// even once its window has also passed.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), InvalidReason> {
        match self.state_at(now) {
            InvitationState::Pending => Ok(()),
            InvitationState::Redeemed => Err(InvalidReason::AlreadyConsumed),
            InvitationState::Expired => Err(InvalidReason::Expired),
        }
    }
}

/// Result of a read-only token check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub invitation: Option<Invitation>,
    pub reason: Option<InvalidReason>,
}

impl ValidationOutcome {
    /// Evaluate a store lookup at `now`.
    pub fn evaluate(invitation: Option<Invitation>, now: DateTime<Utc>) -> Self {
        match invitation {
            None => Self {
                valid: false,
                invitation: None,
                reason: Some(InvalidReason::NotFound),
            },
            Some(invitation) => match invitation.check_redeemable(now) {
                Ok(()) => Self {
                    valid: true,
                    invitation: Some(invitation),
                    reason: None,
                },
                Err(reason) => Self {
                    valid: false,
                    invitation: Some(invitation),
                    reason: Some(reason),
                },
            },
        }
    }
}

/// Lifetime bounds applied when issuing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvitationLimits {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
}

/// An issue request as received from an inviter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationRequest {
    pub email: String,
    pub org_id: OrganizationId,
    pub role: Role,
    pub space: Space,
    pub scope: ScopeRef,
    /// Falls back to [`InvitationLimits::default_ttl`].
    pub ttl: Option<Duration>,
}

impl InvitationRequest {
    /// Validate the request and mint a pending invitation with a fresh token.
    pub fn into_invitation(
        self,
        invited_by: Option<PersonId>,
        limits: &InvitationLimits,
        now: DateTime<Utc>,
    ) -> Result<Invitation, AccessError> {
        let grant = MembershipGrant::new(self.org_id, self.role, self.space, self.scope)
            .map_err(|e| AccessError::Validation(e.to_string()))?;
        let email = Email::parse(&self.email)?;

        let ttl = self.ttl.unwrap_or(limits.default_ttl);
        if ttl <= Duration::zero() {
            return Err(AccessError::Validation("ttl must be positive".to_string()));
        }
        if ttl > limits.max_ttl {
            return Err(AccessError::Validation(format!(
                "ttl exceeds maximum of {} seconds",
                limits.max_ttl.num_seconds()
            )));
        }

        Ok(Invitation {
            token: InvitationToken::generate(),
            email,
            grant,
            invited_by,
            created_at: now,
            expires_at: now + ttl,
            consumed_at: None,
        })
    }
}

/// Decide whether `issuer` (the inviter's active membership) may hand out `grant`.
///
/// Internal admins may invite anyone into their organization. Client admins
/// may invite into their own account only when the policy enables it.
pub fn authorize_issuance(
    issuer: &Membership,
    grant: &MembershipGrant,
    policy: &AccessPolicy,
) -> Result<(), AccessError> {
    if !issuer.is_active() {
        return Err(AccessError::MembershipRevoked);
    }
    if issuer.org_id != grant.org_id {
        return Err(AccessError::Forbidden(
            "cannot invite into another organization".to_string(),
        ));
    }

    match issuer.role {
        Role::Admin => Ok(()),
        Role::ClientAdmin
            if policy.client_admin_can_invite
                && grant.space == Space::Client
                && grant.scope == issuer.scope =>
        {
            Ok(())
        }
        Role::ClientAdmin => Err(AccessError::Forbidden(
            "client admins may only invite into their own account".to_string(),
        )),
        role => Err(AccessError::Forbidden(format!(
            "role '{role}' cannot issue invitations"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::{AccountId, VendorId};

    fn limits() -> InvitationLimits {
        InvitationLimits {
            default_ttl: Duration::days(7),
            max_ttl: Duration::days(30),
        }
    }

    fn request(org_id: OrganizationId) -> InvitationRequest {
        InvitationRequest {
            email: "Vee@Vendor.io".to_string(),
            org_id,
            role: Role::Vendor,
            space: Space::Vendor,
            scope: ScopeRef::Vendor(VendorId::new()),
            ttl: Some(Duration::hours(1)),
        }
    }

    fn issuer(org_id: OrganizationId, role: Role, scope: ScopeRef) -> Membership {
        let grant = MembershipGrant::new(org_id, role, role.space(), scope).unwrap();
        Membership::new(PersonId::new(), grant, Utc::now())
    }

    #[test]
    fn request_becomes_pending_invitation() {
        let now = Utc::now();
        let inv = request(OrganizationId::new())
            .into_invitation(None, &limits(), now)
            .unwrap();
        assert_eq!(inv.email.as_str(), "vee@vendor.io");
        assert_eq!(inv.expires_at, now + Duration::hours(1));
        assert_eq!(inv.state_at(now), InvitationState::Pending);
    }

    #[test]
    fn pairing_mismatch_is_a_validation_error() {
        let mut req = request(OrganizationId::new());
        req.space = Space::Client;
        let err = req.into_invitation(None, &limits(), Utc::now()).unwrap_err();
        assert!(matches!(err, AccessError::Validation(_)));
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let mut zero = request(OrganizationId::new());
        zero.ttl = Some(Duration::zero());
        assert!(zero.into_invitation(None, &limits(), Utc::now()).is_err());

        let mut long = request(OrganizationId::new());
        long.ttl = Some(Duration::days(31));
        assert!(long.into_invitation(None, &limits(), Utc::now()).is_err());

        let mut default = request(OrganizationId::new());
        default.ttl = None;
        let now = Utc::now();
        let inv = default.into_invitation(None, &limits(), now).unwrap();
        assert_eq!(inv.expires_at, now + Duration::days(7));
    }

    #[test]
    fn expiry_is_a_read_time_predicate() {
        let now = Utc::now();
        let inv = request(OrganizationId::new())
            .into_invitation(None, &limits(), now)
            .unwrap();
        let later = now + Duration::hours(2);
        assert_eq!(inv.check_redeemable(later), Err(InvalidReason::Expired));
        assert_eq!(inv.consumed_at, None);
    }

    #[test]
    fn consumed_wins_over_expired() {
        let now = Utc::now();
        let mut inv = request(OrganizationId::new())
            .into_invitation(None, &limits(), now)
            .unwrap();
        inv.consumed_at = Some(now);
        let outcome = ValidationOutcome::evaluate(Some(inv), now + Duration::days(1));
        assert!(!outcome.valid);
        assert_eq!(outcome.reason, Some(InvalidReason::AlreadyConsumed));
    }

    #[test]
    fn missing_invitation_is_not_found() {
        let outcome = ValidationOutcome::evaluate(None, Utc::now());
        assert_eq!(outcome.reason, Some(InvalidReason::NotFound));
        assert!(outcome.invitation.is_none());
    }

    #[test]
    fn admins_may_issue_within_their_org() {
        let org = OrganizationId::new();
        let admin = issuer(org, Role::Admin, ScopeRef::Internal);
        let grant = request(org).into_invitation(None, &limits(), Utc::now()).unwrap().grant;
        assert!(authorize_issuance(&admin, &grant, &AccessPolicy::default()).is_ok());

        let other_org = request(OrganizationId::new())
            .into_invitation(None, &limits(), Utc::now())
            .unwrap()
            .grant;
        assert!(matches!(
            authorize_issuance(&admin, &other_org, &AccessPolicy::default()),
            Err(AccessError::Forbidden(_))
        ));
    }

    #[test]
    fn client_admin_self_service_follows_policy() {
        let org = OrganizationId::new();
        let account = AccountId::new();
        let client_admin = issuer(org, Role::ClientAdmin, ScopeRef::Account(account));
        let own_account = MembershipGrant::new(
            org,
            Role::ClientMember,
            Space::Client,
            ScopeRef::Account(account),
        )
        .unwrap();
        let other_account = MembershipGrant::new(
            org,
            Role::ClientMember,
            Space::Client,
            ScopeRef::Account(AccountId::new()),
        )
        .unwrap();

        let closed = AccessPolicy::default();
        assert!(authorize_issuance(&client_admin, &own_account, &closed).is_err());

        let open = AccessPolicy {
            client_admin_can_invite: true,
            ..AccessPolicy::default()
        };
        assert!(authorize_issuance(&client_admin, &own_account, &open).is_ok());
        assert!(authorize_issuance(&client_admin, &other_account, &open).is_err());
    }

    #[test]
    fn non_admin_staff_cannot_issue() {
        let org = OrganizationId::new();
        let sales = issuer(org, Role::Sales, ScopeRef::Internal);
        let grant = request(org).into_invitation(None, &limits(), Utc::now()).unwrap().grant;
        assert!(matches!(
            authorize_issuance(&sales, &grant, &AccessPolicy::default()),
            Err(AccessError::Forbidden(_))
        ));
    }
}
