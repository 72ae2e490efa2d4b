//! Membership registry: create, list, deactivate and resolve memberships.

use std::sync::Arc;

use tracing::{info, instrument};

use atrium_auth::{
    resolve_default, AccessError, AccessResult, Membership, MembershipGrant, Role, ScopeRef, Space,
};
use atrium_core::{MembershipId, OrganizationId, PersonId};

use crate::clock::Clock;
use crate::store::AccessStore;

#[derive(Clone)]
pub struct MembershipRegistry {
    store: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
}

impl MembershipRegistry {
    pub fn new(store: Arc<dyn AccessStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Active memberships of a person, newest first.
    #[instrument(skip(self), fields(person_id = %person_id), err)]
    pub async fn list_memberships(&self, person_id: PersonId) -> AccessResult<Vec<Membership>> {
        Ok(self.store.list_active_memberships(person_id).await?)
    }

    #[instrument(skip(self), fields(membership_id = %id), err)]
    pub async fn get_membership(&self, id: MembershipId) -> AccessResult<Membership> {
        self.store
            .get_membership(id)
            .await?
            .ok_or_else(|| AccessError::NotFound(format!("membership {id}")))
    }

    /// Grant a role to a person.
    ///
    /// Uniqueness of the active tuple is left to the store's insert, so two
    /// concurrent identical grants yield one membership and one `Conflict`.
    #[instrument(
        skip(self),
        fields(person_id = %person_id, org_id = %org_id, role = %role),
        err
    )]
    pub async fn create_membership(
        &self,
        person_id: PersonId,
        org_id: OrganizationId,
        role: Role,
        space: Space,
        scope: ScopeRef,
    ) -> AccessResult<Membership> {
        let grant = MembershipGrant::new(org_id, role, space, scope)?;

        if self.store.get_person(person_id).await?.is_none() {
            return Err(AccessError::NotFound(format!("person {person_id}")));
        }
        if self.store.get_organization(org_id).await?.is_none() {
            return Err(AccessError::NotFound(format!("organization {org_id}")));
        }

        let membership = Membership::new(person_id, grant, self.clock.now());
        self.store.insert_membership(&membership).await?;

        info!(membership_id = %membership.id, scope = %membership.scope, "membership created");
        Ok(membership)
    }

    /// Idempotent. Sessions bound to the membership fail on their next use.
    #[instrument(skip(self), fields(membership_id = %id), err)]
    pub async fn deactivate_membership(&self, id: MembershipId) -> AccessResult<()> {
        if self.store.deactivate_membership(id, self.clock.now()).await? {
            info!("membership deactivated");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(person_id = %person_id), err)]
    pub async fn resolve_default_membership(
        &self,
        person_id: PersonId,
    ) -> AccessResult<Option<Membership>> {
        let memberships = self.store.list_active_memberships(person_id).await?;
        Ok(resolve_default(&memberships).cloned())
    }
}
