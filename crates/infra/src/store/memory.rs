use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use atrium_auth::{
    Invitation, InvitationToken, Membership, MembershipGrant, MembershipKey, Organization, Person,
    ProjectAssignment, Session, SessionId,
};
use atrium_core::{Email, MembershipId, OrganizationId, PersonId, ProjectId, Slug, VendorId};

use super::{
    AssignmentStore, IdentityStore, InvitationStore, MembershipStore, ProfileUpdate, Provisioned,
    SessionStore, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct Tables {
    organizations: HashMap<OrganizationId, Organization>,
    people: HashMap<PersonId, Person>,
    people_by_email: HashMap<Email, PersonId>,
    memberships: HashMap<MembershipId, Membership>,
    invitations: HashMap<InvitationToken, Invitation>,
    sessions: HashMap<SessionId, Session>,
    assignments: HashMap<(VendorId, ProjectId), ProjectAssignment>,
}

impl Tables {
    fn find_or_create_person(
        &mut self,
        email: &Email,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Person {
        if let Some(person) = self
            .people_by_email
            .get(email)
            .and_then(|id| self.people.get(id))
        {
            return person.clone();
        }

        let person = Person::new(email.clone(), display_name, now);
        self.people_by_email.insert(email.clone(), person.id);
        self.people.insert(person.id, person.clone());
        person
    }

    fn active_with_key(&self, key: &MembershipKey) -> Option<&Membership> {
        self.memberships
            .values()
            .find(|m| m.is_active() && m.key() == *key)
    }

    fn check_membership_insert(&self, membership: &Membership) -> StoreResult<()> {
        if self.memberships.contains_key(&membership.id) {
            return Err(StoreError::UniqueViolation(format!(
                "membership {} already exists",
                membership.id
            )));
        }
        if membership.is_active() && self.active_with_key(&membership.key()).is_some() {
            return Err(StoreError::UniqueViolation(
                "an active membership with this person, organization, role and scope exists"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn insert_membership(&mut self, membership: &Membership) -> StoreResult<()> {
        self.check_membership_insert(membership)?;
        self.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    /// Consume `token` and provision its membership. Every check runs before
    /// the first write, so an error leaves the tables untouched.
    ///
    /// `mint` builds the membership when no active one matches the grant.
    fn redeem<F>(
        &mut self,
        token: &InvitationToken,
        display_name: Option<&str>,
        now: DateTime<Utc>,
        mint: F,
    ) -> StoreResult<Option<Provisioned>>
    where
        F: FnOnce(PersonId, MembershipGrant) -> Membership,
    {
        let mut invitation = match self.invitations.get(token) {
            Some(inv) if inv.consumed_at.is_none() && inv.expires_at > now => inv.clone(),
            _ => return Ok(None),
        };

        let known = self
            .people_by_email
            .get(&invitation.email)
            .and_then(|id| self.people.get(id))
            .cloned();
        let is_new_person = known.is_none();
        let person =
            known.unwrap_or_else(|| Person::new(invitation.email.clone(), display_name, now));

        let key = MembershipKey {
            person_id: person.id,
            grant: invitation.grant,
        };
        let (membership, is_new_membership) = match self.active_with_key(&key) {
            Some(existing) => (existing.clone(), false),
            None => {
                let membership = mint(person.id, invitation.grant);
                self.check_membership_insert(&membership)?;
                (membership, true)
            }
        };

        if is_new_person {
            self.people_by_email.insert(person.email.clone(), person.id);
            self.people.insert(person.id, person.clone());
        }
        if is_new_membership {
            self.memberships.insert(membership.id, membership.clone());
        }
        invitation.consumed_at = Some(now);
        self.invitations.insert(token.clone(), invitation.clone());

        Ok(Some(Provisioned {
            invitation,
            person,
            membership,
        }))
    }
}

/// In-memory implementation of every store contract.
///
/// Intended for tests/dev. A single lock guards all tables, so multi-table
/// operations such as redemption are atomic.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_person_by_email(&self, email: &Email) -> StoreResult<Option<Person>> {
        let tables = self.read()?;
        Ok(tables
            .people_by_email
            .get(email)
            .and_then(|id| tables.people.get(id))
            .cloned())
    }

    async fn get_person(&self, id: PersonId) -> StoreResult<Option<Person>> {
        Ok(self.read()?.people.get(&id).cloned())
    }

    async fn find_or_create_person(
        &self,
        email: &Email,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Person> {
        Ok(self.write()?.find_or_create_person(email, display_name, now))
    }

    async fn update_profile(
        &self,
        id: PersonId,
        update: ProfileUpdate,
    ) -> StoreResult<Option<Person>> {
        let mut tables = self.write()?;
        let Some(person) = tables.people.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.display_name {
            person.display_name = name;
        }
        if let Some(avatar) = update.avatar {
            person.avatar = avatar;
        }
        Ok(Some(person.clone()))
    }

    async fn insert_organization(&self, org: &Organization) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.organizations.values().any(|o| o.slug == org.slug) {
            return Err(StoreError::UniqueViolation(format!(
                "organization slug '{}' is taken",
                org.slug
            )));
        }
        if tables.organizations.contains_key(&org.id) {
            return Err(StoreError::UniqueViolation(format!(
                "organization {} already exists",
                org.id
            )));
        }
        tables.organizations.insert(org.id, org.clone());
        Ok(())
    }

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        Ok(self.read()?.organizations.get(&id).cloned())
    }

    async fn find_organization_by_slug(&self, slug: &Slug) -> StoreResult<Option<Organization>> {
        Ok(self
            .read()?
            .organizations
            .values()
            .find(|o| &o.slug == slug)
            .cloned())
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn list_active_memberships(&self, person_id: PersonId) -> StoreResult<Vec<Membership>> {
        let tables = self.read()?;
        let mut memberships: Vec<Membership> = tables
            .memberships
            .values()
            .filter(|m| m.person_id == person_id && m.is_active())
            .cloned()
            .collect();
        memberships.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(memberships)
    }

    async fn get_membership(&self, id: MembershipId) -> StoreResult<Option<Membership>> {
        Ok(self.read()?.memberships.get(&id).cloned())
    }

    async fn insert_membership(&self, membership: &Membership) -> StoreResult<()> {
        self.write()?.insert_membership(membership)
    }

    async fn deactivate_membership(
        &self,
        id: MembershipId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        match tables.memberships.get_mut(&id) {
            Some(m) if m.is_active() => {
                m.deactivated_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl InvitationStore for InMemoryStore {
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.invitations.contains_key(&invitation.token) {
            return Err(StoreError::UniqueViolation(
                "invitation token already exists".to_string(),
            ));
        }
        tables
            .invitations
            .insert(invitation.token.clone(), invitation.clone());
        Ok(())
    }

    async fn get_invitation(&self, token: &InvitationToken) -> StoreResult<Option<Invitation>> {
        Ok(self.read()?.invitations.get(token).cloned())
    }

    async fn redeem_invitation(
        &self,
        token: &InvitationToken,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Provisioned>> {
        self.write()?.redeem(token, display_name, now, |person_id, grant| {
            Membership::new(person_id, grant, now)
        })
    }

    async fn purge_invitations(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.write()?;
        let len = tables.invitations.len();
        tables.invitations.retain(|_, inv| {
            let consumed = inv.consumed_at.is_some_and(|at| at < before);
            let expired = inv.expires_at < before;
            !(consumed || expired)
        });
        Ok((len - tables.invitations.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.sessions.contains_key(&session.id) {
            return Err(StoreError::UniqueViolation(
                "session id already exists".to_string(),
            ));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    async fn switch_active_membership(
        &self,
        id: &SessionId,
        person_id: PersonId,
        membership_id: MembershipId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut tables = self.write()?;
        match tables.sessions.get_mut(id) {
            Some(session) if session.person_id == person_id => {
                session.active_membership_id = membership_id;
                session.expires_at = expires_at;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        Ok(self.write()?.sessions.remove(id).is_some())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.write()?;
        let len = tables.sessions.len();
        tables.sessions.retain(|_, s| s.expires_at > now);
        Ok((len - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn list_active_project_assignments(
        &self,
        vendor_id: VendorId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ProjectAssignment>> {
        let tables = self.read()?;
        let mut active: Vec<ProjectAssignment> = tables
            .assignments
            .values()
            .filter(|a| a.vendor_id == vendor_id && a.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by_key(|a| a.project_id);
        Ok(active)
    }

    async fn upsert_assignment(&self, assignment: &ProjectAssignment) -> StoreResult<()> {
        self.write()?.assignments.insert(
            (assignment.vendor_id, assignment.project_id),
            assignment.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_auth::{Role, ScopeRef, Space};
    use chrono::Duration;

    fn grant() -> MembershipGrant {
        MembershipGrant::new(
            OrganizationId::new(),
            Role::Admin,
            Space::Internal,
            ScopeRef::Internal,
        )
        .unwrap()
    }

    fn email(raw: &str) -> Email {
        Email::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn duplicate_active_membership_is_a_unique_violation() {
        let store = InMemoryStore::new();
        let person = PersonId::new();
        let grant = grant();
        let now = Utc::now();

        store.insert_membership(&Membership::new(person, grant, now)).await.unwrap();
        let err = store
            .insert_membership(&Membership::new(person, grant, now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn regrant_after_deactivation_is_allowed() {
        let store = InMemoryStore::new();
        let person = PersonId::new();
        let grant = grant();
        let now = Utc::now();

        let first = Membership::new(person, grant, now);
        store.insert_membership(&first).await.unwrap();
        assert!(store.deactivate_membership(first.id, now).await.unwrap());
        assert!(!store.deactivate_membership(first.id, now).await.unwrap());

        let second = Membership::new(person, grant, now);
        store.insert_membership(&second).await.unwrap();
        let active = store.list_active_memberships(person).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn people_are_unique_by_email() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let a = store
            .find_or_create_person(&email("pat@example.com"), Some("Pat"), now)
            .await
            .unwrap();
        let b = store
            .find_or_create_person(&email("PAT@example.com"), Some("Other"), now)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.display_name, "Pat");
    }

    #[tokio::test]
    async fn organization_slugs_are_unique() {
        let store = InMemoryStore::new();
        let slug = Slug::parse("acme").unwrap();
        let now = Utc::now();
        store
            .insert_organization(&Organization::new("Acme", slug.clone(), now).unwrap())
            .await
            .unwrap();
        let err = store
            .insert_organization(&Organization::new("Acme 2", slug, now).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn switch_is_conditional_on_person() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let membership = Membership::new(PersonId::new(), grant(), now);
        let session = Session::issue(&membership, now, Duration::hours(1));
        store.insert_session(&session).await.unwrap();

        let stranger = store
            .switch_active_membership(&session.id, PersonId::new(), MembershipId::new(), now)
            .await
            .unwrap();
        assert!(stranger.is_none());

        let target = MembershipId::new();
        let switched = store
            .switch_active_membership(
                &session.id,
                membership.person_id,
                target,
                now + Duration::hours(2),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(switched.active_membership_id, target);
        assert_eq!(switched.expires_at, now + Duration::hours(2));
    }

    #[tokio::test]
    async fn purges_remove_only_stale_rows() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let membership = Membership::new(PersonId::new(), grant(), now);
        let live = Session::issue(&membership, now, Duration::hours(1));
        let stale = Session::issue(&membership, now - Duration::hours(2), Duration::hours(1));
        store.insert_session(&live).await.unwrap();
        store.insert_session(&stale).await.unwrap();

        assert_eq!(store.purge_expired_sessions(now).await.unwrap(), 1);
        assert!(store.get_session(&live.id).await.unwrap().is_some());
        assert!(store.get_session(&stale.id).await.unwrap().is_none());
    }

    fn invitation(email: &str, now: DateTime<Utc>) -> Invitation {
        Invitation {
            token: InvitationToken::generate(),
            email: Email::parse(email).unwrap(),
            grant: grant(),
            invited_by: None,
            created_at: now,
            expires_at: now + Duration::days(1),
            consumed_at: None,
        }
    }

    #[test]
    fn failed_provisioning_leaves_the_invitation_pending() {
        let now = Utc::now();
        let mut tables = Tables::default();
        let invite = invitation("quinn@example.com", now);
        tables.invitations.insert(invite.token.clone(), invite.clone());

        // A retired membership already holds the id the mint will hand out.
        let mut taken = Membership::new(PersonId::new(), grant(), now);
        taken.deactivated_at = Some(now);
        tables.memberships.insert(taken.id, taken.clone());

        let err = tables
            .redeem(&invite.token, Some("Quinn"), now, |person_id, grant| Membership {
                id: taken.id,
                ..Membership::new(person_id, grant, now)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        assert_eq!(tables.invitations[&invite.token].consumed_at, None);
        assert!(tables.people.is_empty());
        assert_eq!(tables.memberships.len(), 1);

        let provisioned = tables
            .redeem(&invite.token, Some("Quinn"), now, |person_id, grant| {
                Membership::new(person_id, grant, now)
            })
            .unwrap()
            .unwrap();
        assert_eq!(provisioned.invitation.consumed_at, Some(now));
        assert_eq!(tables.people.len(), 1);
        assert_eq!(tables.memberships.len(), 2);
    }

    #[tokio::test]
    async fn invitation_purge_keeps_rows_spent_after_the_cutoff() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let recent = Invitation {
            expires_at: now - Duration::hours(1),
            ..invitation("recent@example.com", now - Duration::days(2))
        };
        let ancient = Invitation {
            expires_at: now - Duration::days(40),
            ..invitation("ancient@example.com", now - Duration::days(41))
        };
        store.insert_invitation(&recent).await.unwrap();
        store.insert_invitation(&ancient).await.unwrap();

        let purged = store.purge_invitations(now - Duration::days(30)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_invitation(&recent.token).await.unwrap().is_some());
        assert!(store.get_invitation(&ancient.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let err = store.get_person(PersonId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_available(true);
        assert!(store.get_person(PersonId::new()).await.unwrap().is_none());
    }
}
