use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use atrium_core::{AccountId, OrganizationId, ProjectId, VendorId};

use crate::policy::{AccessPolicy, Operation, RecordKind};
use crate::scope::check_pairing;
use crate::{Membership, Role, ScopeRef, Space};

/// Everything the gate knows about the caller.
///
/// Built per call from the session's active membership. For vendor
/// memberships, `active_projects` is resolved by the caller on every call and
/// never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    pub org_id: OrganizationId,
    pub role: Role,
    pub space: Space,
    pub scope: ScopeRef,
    pub active_projects: BTreeSet<ProjectId>,
}

impl AccessContext {
    pub fn from_membership(membership: &Membership) -> Self {
        Self {
            org_id: membership.org_id,
            role: membership.role,
            space: membership.space,
            scope: membership.scope,
            active_projects: BTreeSet::new(),
        }
    }

    pub fn with_active_projects(mut self, projects: impl IntoIterator<Item = ProjectId>) -> Self {
        self.active_projects = projects.into_iter().collect();
        self
    }
}

/// The scoping markers of a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: RecordKind,
    pub org_id: OrganizationId,
    pub account_id: Option<AccountId>,
    pub vendor_id: Option<VendorId>,
    pub project_id: Option<ProjectId>,
}

impl RecordRef {
    pub fn new(kind: impl Into<std::borrow::Cow<'static, str>>, org_id: OrganizationId) -> Self {
        Self {
            kind: RecordKind::new(kind),
            org_id,
            account_id: None,
            vendor_id: None,
            project_id: None,
        }
    }

    pub fn in_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn for_vendor(mut self, vendor_id: VendorId) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn in_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

/// What an operation touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Target {
    Record(RecordRef),
    Collection { kind: RecordKind, org_id: OrganizationId },
}

impl Target {
    pub fn collection(kind: impl Into<std::borrow::Cow<'static, str>>, org_id: OrganizationId) -> Self {
        Target::Collection {
            kind: RecordKind::new(kind),
            org_id,
        }
    }

    pub fn kind(&self) -> &RecordKind {
        match self {
            Target::Record(record) => &record.kind,
            Target::Collection { kind, .. } => kind,
        }
    }

    pub fn org_id(&self) -> OrganizationId {
        match self {
            Target::Record(record) => record.org_id,
            Target::Collection { org_id, .. } => *org_id,
        }
    }
}

impl From<RecordRef> for Target {
    fn from(value: RecordRef) -> Self {
        Target::Record(value)
    }
}

/// Filter the data-access layer must AND into its query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Organization {
        org_id: OrganizationId,
    },
    Account {
        org_id: OrganizationId,
        account_id: AccountId,
    },
    Vendor {
        org_id: OrganizationId,
        vendor_id: VendorId,
    },
    Projects {
        org_id: OrganizationId,
        vendor_id: VendorId,
        project_ids: BTreeSet<ProjectId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    OrganizationMismatch,
    SpaceMismatch,
    OperationNotPermitted,
    ScopeMismatch,
    AssignmentInactive,
}

impl DenialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialKind::OrganizationMismatch => "organization_mismatch",
            DenialKind::SpaceMismatch => "space_mismatch",
            DenialKind::OperationNotPermitted => "operation_not_permitted",
            DenialKind::ScopeMismatch => "scope_mismatch",
            DenialKind::AssignmentInactive => "assignment_inactive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub kind: DenialKind,
    pub message: String,
}

/// Outcome of the gate. A denial is an ordinary value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow(Predicate),
    Deny(Denial),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        match self {
            Decision::Allow(predicate) => Some(predicate),
            Decision::Deny(_) => None,
        }
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allow(_) => None,
            Decision::Deny(denial) => Some(denial),
        }
    }

    fn deny(kind: DenialKind, message: impl Into<String>) -> Self {
        Decision::Deny(Denial {
            kind,
            message: message.into(),
        })
    }
}

/// Malformed gate input (as opposed to a denial).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("{kind} record is missing its {marker} marker")]
    MissingMarker { kind: RecordKind, marker: &'static str },
}

/// Decide whether `ctx` may perform `op` on `target`.
///
/// - No IO
/// - No panics
/// - Deterministic: identical inputs give identical outputs
pub fn authorize(
    ctx: &AccessContext,
    op: Operation,
    target: &Target,
    policy: &AccessPolicy,
) -> Result<Decision, GateError> {
    if let Err(e) = check_pairing(ctx.role, ctx.space, &ctx.scope) {
        return Ok(Decision::deny(DenialKind::SpaceMismatch, e.to_string()));
    }
    if target.org_id() != ctx.org_id {
        return Ok(Decision::deny(
            DenialKind::OrganizationMismatch,
            "target belongs to another organization",
        ));
    }

    match (ctx.space, ctx.scope) {
        // Internal staff see the whole organization; finer per-role limits
        // belong to the data layer, not the gate.
        (Space::Internal, ScopeRef::Internal) => {
            Ok(Decision::Allow(Predicate::Organization { org_id: ctx.org_id }))
        }
        (Space::Client, ScopeRef::Account(account_id)) => {
            authorize_client(ctx, account_id, op, target, policy)
        }
        (Space::Vendor, ScopeRef::Vendor(vendor_id)) => {
            authorize_vendor(ctx, vendor_id, op, target, policy)
        }
        // Unreachable after the pairing check; fall back to deny.
        _ => Ok(Decision::deny(
            DenialKind::SpaceMismatch,
            "scope does not match space",
        )),
    }
}

fn authorize_client(
    ctx: &AccessContext,
    account_id: AccountId,
    op: Operation,
    target: &Target,
    policy: &AccessPolicy,
) -> Result<Decision, GateError> {
    if !policy.allows(ctx.role, target.kind(), op) {
        return Ok(not_permitted(ctx.role, op, target.kind()));
    }

    if let Target::Record(record) = target {
        let Some(record_account) = record.account_id else {
            return Err(GateError::MissingMarker {
                kind: record.kind.clone(),
                marker: "account",
            });
        };
        if record_account != account_id {
            return Ok(Decision::deny(
                DenialKind::ScopeMismatch,
                "record belongs to another account",
            ));
        }
    }

    Ok(Decision::Allow(Predicate::Account {
        org_id: ctx.org_id,
        account_id,
    }))
}

fn authorize_vendor(
    ctx: &AccessContext,
    vendor_id: VendorId,
    op: Operation,
    target: &Target,
    policy: &AccessPolicy,
) -> Result<Decision, GateError> {
    if !policy.allows(ctx.role, target.kind(), op) {
        return Ok(not_permitted(ctx.role, op, target.kind()));
    }

    let record = match target {
        Target::Collection { .. } => {
            if ctx.active_projects.is_empty() {
                return Ok(Decision::deny(
                    DenialKind::AssignmentInactive,
                    "vendor has no active project assignment",
                ));
            }
            return Ok(Decision::Allow(Predicate::Projects {
                org_id: ctx.org_id,
                vendor_id,
                project_ids: ctx.active_projects.clone(),
            }));
        }
        Target::Record(record) => record,
    };

    if record.vendor_id.is_some_and(|id| id != vendor_id) {
        return Ok(Decision::deny(
            DenialKind::ScopeMismatch,
            "record belongs to another vendor",
        ));
    }

    match (record.project_id, record.vendor_id) {
        (Some(project_id), _) => {
            if !ctx.active_projects.contains(&project_id) {
                return Ok(Decision::deny(
                    DenialKind::AssignmentInactive,
                    "project is not actively assigned to this vendor",
                ));
            }
            Ok(Decision::Allow(Predicate::Projects {
                org_id: ctx.org_id,
                vendor_id,
                project_ids: BTreeSet::from([project_id]),
            }))
        }
        (None, Some(_)) => {
            if policy.vendor_profile_requires_assignment && ctx.active_projects.is_empty() {
                return Ok(Decision::deny(
                    DenialKind::AssignmentInactive,
                    "vendor has no active project assignment",
                ));
            }
            Ok(Decision::Allow(Predicate::Vendor {
                org_id: ctx.org_id,
                vendor_id,
            }))
        }
        (None, None) => Err(GateError::MissingMarker {
            kind: record.kind.clone(),
            marker: "project or vendor",
        }),
    }
}

fn not_permitted(role: Role, op: Operation, kind: &RecordKind) -> Decision {
    Decision::deny(
        DenialKind::OperationNotPermitted,
        format!("role '{role}' may not {op} {kind}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MembershipGrant;
    use chrono::Utc;
    use atrium_core::PersonId;
    use proptest::prelude::*;

    fn ctx(org_id: OrganizationId, role: Role, scope: ScopeRef) -> AccessContext {
        let grant = MembershipGrant::new(org_id, role, role.space(), scope).unwrap();
        AccessContext::from_membership(&Membership::new(PersonId::new(), grant, Utc::now()))
    }

    fn kind_of(decision: &Decision) -> Option<DenialKind> {
        decision.denial().map(|d| d.kind)
    }

    #[test]
    fn internal_sees_whole_org() {
        let org = OrganizationId::new();
        let admin = ctx(org, Role::Admin, ScopeRef::Internal);
        let record = RecordRef::new("deal", org).in_account(AccountId::new());
        let decision = authorize(&admin, Operation::Delete, &record.into(), &AccessPolicy::default())
            .unwrap();
        assert_eq!(decision, Decision::Allow(Predicate::Organization { org_id: org }));
    }

    #[test]
    fn other_org_is_denied_first() {
        let org = OrganizationId::new();
        let admin = ctx(org, Role::Admin, ScopeRef::Internal);
        let target = Target::collection("deal", OrganizationId::new());
        let decision = authorize(&admin, Operation::Read, &target, &AccessPolicy::default()).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::OrganizationMismatch));
    }

    #[test]
    fn inconsistent_context_is_denied() {
        let org = OrganizationId::new();
        let mut broken = ctx(org, Role::Admin, ScopeRef::Internal);
        broken.scope = ScopeRef::Account(AccountId::new());
        let target = Target::collection("deal", org);
        let decision = authorize(&broken, Operation::Read, &target, &AccessPolicy::default()).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::SpaceMismatch));
    }

    #[test]
    fn every_internal_role_may_mutate_within_the_org() {
        let org = OrganizationId::new();
        let target = Target::Record(RecordRef::new("invoice", org));
        let policy = AccessPolicy::default();

        for role in [Role::Admin, Role::Sales, Role::Delivery, Role::Finance] {
            let member = ctx(org, role, ScopeRef::Internal);
            for op in Operation::ALL {
                assert_eq!(
                    authorize(&member, op, &target, &policy).unwrap(),
                    Decision::Allow(Predicate::Organization { org_id: org })
                );
            }
        }
    }

    #[test]
    fn client_is_confined_to_its_account() {
        let org = OrganizationId::new();
        let account7 = AccountId::new();
        let member = ctx(org, Role::ClientMember, ScopeRef::Account(account7));
        let policy = AccessPolicy::default();

        let own = RecordRef::new("project", org).in_account(account7).into();
        assert_eq!(
            authorize(&member, Operation::Read, &own, &policy).unwrap(),
            Decision::Allow(Predicate::Account {
                org_id: org,
                account_id: account7
            })
        );

        let foreign = RecordRef::new("project", org).in_account(AccountId::new()).into();
        let decision = authorize(&member, Operation::Read, &foreign, &policy).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::ScopeMismatch));
    }

    #[test]
    fn client_operation_must_be_allow_listed() {
        let org = OrganizationId::new();
        let account = AccountId::new();
        let member = ctx(org, Role::ClientMember, ScopeRef::Account(account));
        let invoice = RecordRef::new("invoice", org).in_account(account).into();
        let decision =
            authorize(&member, Operation::Read, &invoice, &AccessPolicy::default()).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::OperationNotPermitted));
    }

    #[test]
    fn client_admin_may_update_where_client_member_may_not() {
        let org = OrganizationId::new();
        let account = AccountId::new();
        let admin = ctx(org, Role::ClientAdmin, ScopeRef::Account(account));
        let member = ctx(org, Role::ClientMember, ScopeRef::Account(account));
        let project: Target = RecordRef::new("project", org).in_account(account).into();
        let policy = AccessPolicy::default();

        assert_eq!(
            authorize(&admin, Operation::Update, &project, &policy).unwrap(),
            Decision::Allow(Predicate::Account {
                org_id: org,
                account_id: account
            })
        );
        let decision = authorize(&member, Operation::Update, &project, &policy).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::OperationNotPermitted));
        assert!(authorize(&member, Operation::Read, &project, &policy).unwrap().is_allow());
    }

    #[test]
    fn client_record_without_account_is_malformed() {
        let org = OrganizationId::new();
        let member = ctx(org, Role::ClientAdmin, ScopeRef::Account(AccountId::new()));
        let bare = RecordRef::new("project", org).into();
        let err = authorize(&member, Operation::Read, &bare, &AccessPolicy::default()).unwrap_err();
        assert!(matches!(err, GateError::MissingMarker { marker: "account", .. }));
    }

    #[test]
    fn client_collection_is_account_scoped() {
        let org = OrganizationId::new();
        let account = AccountId::new();
        let admin = ctx(org, Role::ClientAdmin, ScopeRef::Account(account));
        let decision = authorize(
            &admin,
            Operation::Read,
            &Target::collection("invoice", org),
            &AccessPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            decision.predicate(),
            Some(&Predicate::Account {
                org_id: org,
                account_id: account
            })
        );
    }

    #[test]
    fn vendor_sees_only_active_projects() {
        let org = OrganizationId::new();
        let vendor = VendorId::new();
        let assigned = ProjectId::new();
        let ctx = ctx(org, Role::Vendor, ScopeRef::Vendor(vendor)).with_active_projects([assigned]);
        let policy = AccessPolicy::default();

        let ok = RecordRef::new("task", org).in_project(assigned).into();
        assert!(authorize(&ctx, Operation::Update, &ok, &policy).unwrap().is_allow());

        let other = RecordRef::new("task", org).in_project(ProjectId::new()).into();
        let decision = authorize(&ctx, Operation::Read, &other, &policy).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::AssignmentInactive));

        let wrong_vendor = RecordRef::new("task", org)
            .in_project(assigned)
            .for_vendor(VendorId::new())
            .into();
        let decision = authorize(&ctx, Operation::Read, &wrong_vendor, &policy).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::ScopeMismatch));
    }

    #[test]
    fn vendor_collection_requires_an_assignment() {
        let org = OrganizationId::new();
        let vendor = VendorId::new();
        let idle = ctx(org, Role::Vendor, ScopeRef::Vendor(vendor));
        let target = Target::collection("project", org);
        let policy = AccessPolicy::default();

        let decision = authorize(&idle, Operation::Read, &target, &policy).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::AssignmentInactive));

        let project = ProjectId::new();
        let busy = idle.with_active_projects([project]);
        assert_eq!(
            authorize(&busy, Operation::Read, &target, &policy).unwrap(),
            Decision::Allow(Predicate::Projects {
                org_id: org,
                vendor_id: vendor,
                project_ids: BTreeSet::from([project]),
            })
        );
    }

    #[test]
    fn vendor_profile_visibility_follows_policy() {
        let org = OrganizationId::new();
        let vendor = VendorId::new();
        let idle = ctx(org, Role::Vendor, ScopeRef::Vendor(vendor));
        let profile: Target = RecordRef::new("vendor_profile", org).for_vendor(vendor).into();

        let lenient = AccessPolicy::default();
        assert_eq!(
            authorize(&idle, Operation::Read, &profile, &lenient).unwrap(),
            Decision::Allow(Predicate::Vendor {
                org_id: org,
                vendor_id: vendor
            })
        );

        let strict = AccessPolicy {
            vendor_profile_requires_assignment: true,
            ..AccessPolicy::default()
        };
        let decision = authorize(&idle, Operation::Read, &profile, &strict).unwrap();
        assert_eq!(kind_of(&decision), Some(DenialKind::AssignmentInactive));
    }

    #[test]
    fn vendor_record_without_markers_is_malformed() {
        let org = OrganizationId::new();
        let vendor = ctx(org, Role::Vendor, ScopeRef::Vendor(VendorId::new()));
        let bare = RecordRef::new("task", org).into();
        let err = authorize(&vendor, Operation::Read, &bare, &AccessPolicy::default()).unwrap_err();
        assert!(matches!(err, GateError::MissingMarker { .. }));
    }

    #[test]
    fn decision_serializes_tagged() {
        let org = OrganizationId::new();
        let decision = Decision::Allow(Predicate::Organization { org_id: org });
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "allow");
        assert_eq!(json["kind"], "organization");
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    fn arb_op() -> impl Strategy<Value = Operation> {
        prop::sample::select(Operation::ALL.to_vec())
    }

    fn arb_kind() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec!["project", "invoice", "task", "message", "vendor_profile", "deal"])
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn gate_is_deterministic(
            role in arb_role(),
            op in arb_op(),
            kind in arb_kind(),
            same_org in any::<bool>(),
            with_account in any::<bool>(),
            with_project in any::<bool>(),
            assigned in any::<bool>(),
        ) {
            let org = OrganizationId::new();
            let account = AccountId::new();
            let vendor = VendorId::new();
            let project = ProjectId::new();

            let scope = match role.space() {
                Space::Internal => ScopeRef::Internal,
                Space::Client => ScopeRef::Account(account),
                Space::Vendor => ScopeRef::Vendor(vendor),
            };
            let mut context = ctx(org, role, scope);
            if assigned {
                context = context.with_active_projects([project]);
            }

            let target_org = if same_org { org } else { OrganizationId::new() };
            let mut record = RecordRef::new(kind, target_org).for_vendor(vendor);
            if with_account {
                record = record.in_account(account);
            }
            if with_project {
                record = record.in_project(project);
            }
            let target = Target::Record(record);
            let policy = AccessPolicy::default();

            let first = authorize(&context, op, &target, &policy);
            let second = authorize(&context, op, &target, &policy);
            prop_assert_eq!(&first, &second);

            if !same_org {
                let decision = first.unwrap();
                prop_assert_eq!(kind_of(&decision), Some(DenialKind::OrganizationMismatch));
            }
        }
    }
}
