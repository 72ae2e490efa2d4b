//! Postgres-backed store implementation.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (connection exception / admin shutdown) | `08xxx`, `57P01` | `Unavailable` |
//! | Database (other) | any other | `Rejected` |
//! | PoolClosed, PoolTimedOut, Io, Tls, WorkerCrashed | N/A | `Unavailable` |
//! | RowNotFound, column/decode errors | N/A | `Corrupt` |
//!
//! ## Token Storage
//!
//! Invitation tokens and session ids are bearer secrets; only their SHA-256
//! digests are persisted.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;

use atrium_auth::{
    Invitation, InvitationToken, Membership, MembershipGrant, Organization, Person, Predicate,
    ProjectAssignment, Role, ScopeRef, Session, SessionId, Space,
};
use atrium_core::{
    AccountId, Email, MembershipId, OrganizationId, PersonId, ProjectId, Slug, VendorId,
};

use super::{
    AssignmentStore, IdentityStore, InvitationStore, MembershipStore, ProfileUpdate, Provisioned,
    SessionStore, StoreError, StoreResult,
};

/// Schema, applied in order by [`PostgresStore::migrate`]. Idempotent.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL,
        slug        TEXT NOT NULL UNIQUE,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS people (
        id            UUID PRIMARY KEY,
        email         TEXT NOT NULL UNIQUE,
        display_name  TEXT NOT NULL,
        avatar        TEXT,
        created_at    TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS memberships (
        id              UUID PRIMARY KEY,
        person_id       UUID NOT NULL REFERENCES people (id),
        org_id          UUID NOT NULL REFERENCES organizations (id),
        role            TEXT NOT NULL,
        space           TEXT NOT NULL,
        scope_kind      TEXT NOT NULL,
        scope_id        UUID NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        deactivated_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS memberships_active_tuple
        ON memberships (person_id, org_id, role, space, scope_kind, scope_id)
        WHERE deactivated_at IS NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS memberships_person ON memberships (person_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invitations (
        token_digest  BYTEA PRIMARY KEY,
        email         TEXT NOT NULL,
        org_id        UUID NOT NULL REFERENCES organizations (id),
        role          TEXT NOT NULL,
        space         TEXT NOT NULL,
        scope_kind    TEXT NOT NULL,
        scope_id      UUID NOT NULL,
        invited_by    UUID,
        created_at    TIMESTAMPTZ NOT NULL,
        expires_at    TIMESTAMPTZ NOT NULL,
        consumed_at   TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id_digest             BYTEA PRIMARY KEY,
        person_id             UUID NOT NULL REFERENCES people (id),
        active_membership_id  UUID NOT NULL REFERENCES memberships (id),
        issued_at             TIMESTAMPTZ NOT NULL,
        expires_at            TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_assignments (
        vendor_id   UUID NOT NULL,
        project_id  UUID NOT NULL,
        org_id      UUID NOT NULL REFERENCES organizations (id),
        starts_at   TIMESTAMPTZ NOT NULL,
        ends_at     TIMESTAMPTZ,
        revoked_at  TIMESTAMPTZ,
        PRIMARY KEY (vendor_id, project_id)
    )
    "#,
];

const MEMBERSHIP_COLUMNS: &str =
    "id, person_id, org_id, role, space, scope_kind, scope_id, created_at, deactivated_at";
const PERSON_COLUMNS: &str = "id, email, display_name, avatar, created_at";

/// Postgres-backed implementation of every store contract.
///
/// Multi-row invariants live in the schema: the partial unique index on
/// active membership tuples, unique slugs and emails. Redemption runs in a
/// single transaction whose first statement is the conditional consume, so
/// concurrent redeemers serialize on the invitation row.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PostgresStore {
    #[instrument(skip(self, email), err)]
    async fn find_person_by_email(&self, email: &Email) -> StoreResult<Option<Person>> {
        let row = sqlx::query(&format!(
            "SELECT {PERSON_COLUMNS} FROM people WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_person_by_email", e))?;
        row.as_ref().map(person_from_row).transpose()
    }

    #[instrument(skip(self), fields(person_id = %id), err)]
    async fn get_person(&self, id: PersonId) -> StoreResult<Option<Person>> {
        let row = sqlx::query(&format!("SELECT {PERSON_COLUMNS} FROM people WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_person", e))?;
        row.as_ref().map(person_from_row).transpose()
    }

    #[instrument(skip(self, email, display_name), err)]
    async fn find_or_create_person(
        &self,
        email: &Email,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Person> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        find_or_create_person(&mut conn, email, display_name, now).await
    }

    #[instrument(skip(self, update), fields(person_id = %id), err)]
    async fn update_profile(
        &self,
        id: PersonId,
        update: ProfileUpdate,
    ) -> StoreResult<Option<Person>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE people
            SET display_name = COALESCE($2, display_name),
                avatar = CASE WHEN $3 THEN $4 ELSE avatar END
            WHERE id = $1
            RETURNING {PERSON_COLUMNS}
            "#
        ))
        .bind(*id.as_uuid())
        .bind(update.display_name)
        .bind(update.avatar.is_some())
        .bind(update.avatar.flatten())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_profile", e))?;
        row.as_ref().map(person_from_row).transpose()
    }

    #[instrument(skip(self, org), fields(org_id = %org.id, slug = %org.slug), err)]
    async fn insert_organization(&self, org: &Organization) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(*org.id.as_uuid())
        .bind(&org.name)
        .bind(org.slug.as_str())
        .bind(org.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_organization", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(org_id = %id), err)]
    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let row = sqlx::query("SELECT id, name, slug, created_at FROM organizations WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_organization", e))?;
        row.as_ref().map(organization_from_row).transpose()
    }

    #[instrument(skip(self), fields(slug = %slug), err)]
    async fn find_organization_by_slug(&self, slug: &Slug) -> StoreResult<Option<Organization>> {
        let row =
            sqlx::query("SELECT id, name, slug, created_at FROM organizations WHERE slug = $1")
                .bind(slug.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_organization_by_slug", e))?;
        row.as_ref().map(organization_from_row).transpose()
    }
}

#[async_trait]
impl MembershipStore for PostgresStore {
    #[instrument(skip(self), fields(person_id = %person_id), err)]
    async fn list_active_memberships(&self, person_id: PersonId) -> StoreResult<Vec<Membership>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS}
            FROM memberships
            WHERE person_id = $1 AND deactivated_at IS NULL
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(*person_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self), fields(membership_id = %id), err)]
    async fn get_membership(&self, id: MembershipId) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_membership", e))?;
        row.as_ref().map(membership_from_row).transpose()
    }

    #[instrument(
        skip(self, membership),
        fields(membership_id = %membership.id, person_id = %membership.person_id),
        err
    )]
    async fn insert_membership(&self, membership: &Membership) -> StoreResult<()> {
        let (scope_kind, scope_id) = scope_columns(&membership.scope);
        sqlx::query(&format!(
            r#"
            INSERT INTO memberships ({MEMBERSHIP_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#
        ))
        .bind(*membership.id.as_uuid())
        .bind(*membership.person_id.as_uuid())
        .bind(*membership.org_id.as_uuid())
        .bind(membership.role.as_str())
        .bind(membership.space.as_str())
        .bind(scope_kind)
        .bind(scope_id)
        .bind(membership.created_at)
        .bind(membership.deactivated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_membership", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(membership_id = %id), err)]
    async fn deactivate_membership(
        &self,
        id: MembershipId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE memberships SET deactivated_at = $2 WHERE id = $1 AND deactivated_at IS NULL",
        )
        .bind(*id.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_membership", e))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl InvitationStore for PostgresStore {
    #[instrument(skip(self, invitation), fields(org_id = %invitation.grant.org_id), err)]
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        let (scope_kind, scope_id) = scope_columns(&invitation.grant.scope);
        sqlx::query(
            r#"
            INSERT INTO invitations (
                token_digest, email, org_id, role, space, scope_kind, scope_id,
                invited_by, created_at, expires_at, consumed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(digest(invitation.token.as_str()))
        .bind(invitation.email.as_str())
        .bind(*invitation.grant.org_id.as_uuid())
        .bind(invitation.grant.role.as_str())
        .bind(invitation.grant.space.as_str())
        .bind(scope_kind)
        .bind(scope_id)
        .bind(invitation.invited_by.map(Uuid::from))
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(invitation.consumed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_invitation", e))?;
        Ok(())
    }

    #[instrument(skip(self, token), err)]
    async fn get_invitation(&self, token: &InvitationToken) -> StoreResult<Option<Invitation>> {
        let row = sqlx::query(
            r#"
            SELECT email, org_id, role, space, scope_kind, scope_id,
                   invited_by, created_at, expires_at, consumed_at
            FROM invitations
            WHERE token_digest = $1
            "#,
        )
        .bind(digest(token.as_str()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_invitation", e))?;
        row.as_ref()
            .map(|row| invitation_from_row(token, row))
            .transpose()
    }

    #[instrument(skip(self, token, display_name), err)]
    async fn redeem_invitation(
        &self,
        token: &InvitationToken,
        display_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Provisioned>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Row lock on the invitation: concurrent redeemers block here and
        // then see `consumed_at` set.
        let consumed = sqlx::query(
            r#"
            UPDATE invitations
            SET consumed_at = $2
            WHERE token_digest = $1 AND consumed_at IS NULL AND expires_at > $2
            RETURNING email, org_id, role, space, scope_kind, scope_id,
                      invited_by, created_at, expires_at, consumed_at
            "#,
        )
        .bind(digest(token.as_str()))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("consume_invitation", e))?;

        let Some(row) = consumed else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };
        let invitation = invitation_from_row(token, &row)?;

        let person = find_or_create_person(&mut tx, &invitation.email, display_name, now).await?;

        let candidate = Membership::new(person.id, invitation.grant, now);
        let (scope_kind, scope_id) = scope_columns(&candidate.scope);
        sqlx::query(&format!(
            r#"
            INSERT INTO memberships ({MEMBERSHIP_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)
            ON CONFLICT (person_id, org_id, role, space, scope_kind, scope_id)
                WHERE deactivated_at IS NULL
            DO NOTHING
            "#
        ))
        .bind(*candidate.id.as_uuid())
        .bind(*candidate.person_id.as_uuid())
        .bind(*candidate.org_id.as_uuid())
        .bind(candidate.role.as_str())
        .bind(candidate.space.as_str())
        .bind(scope_kind)
        .bind(scope_id)
        .bind(candidate.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_membership", e))?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS}
            FROM memberships
            WHERE person_id = $1 AND org_id = $2 AND role = $3 AND space = $4
              AND scope_kind = $5 AND scope_id = $6 AND deactivated_at IS NULL
            "#
        ))
        .bind(*candidate.person_id.as_uuid())
        .bind(*candidate.org_id.as_uuid())
        .bind(candidate.role.as_str())
        .bind(candidate.space.as_str())
        .bind(scope_kind)
        .bind(scope_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_membership", e))?;
        let membership = membership_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Some(Provisioned {
            invitation,
            person,
            membership,
        }))
    }

    #[instrument(skip(self), err)]
    async fn purge_invitations(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM invitations WHERE consumed_at < $1 OR expires_at < $1")
                .bind(before)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("purge_invitations", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    #[instrument(skip(self, session), fields(person_id = %session.person_id), err)]
    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id_digest, person_id, active_membership_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(digest(session.id.as_str()))
        .bind(*session.person_id.as_uuid())
        .bind(*session.active_membership_id.as_uuid())
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    #[instrument(skip(self, id), err)]
    async fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT person_id, active_membership_id, issued_at, expires_at
            FROM sessions
            WHERE id_digest = $1
            "#,
        )
        .bind(digest(id.as_str()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_session", e))?;
        row.as_ref().map(|row| session_from_row(id, row)).transpose()
    }

    #[instrument(
        skip(self, id),
        fields(person_id = %person_id, membership_id = %membership_id),
        err
    )]
    async fn switch_active_membership(
        &self,
        id: &SessionId,
        person_id: PersonId,
        membership_id: MembershipId,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let row = sqlx::query(
            r#"
            UPDATE sessions
            SET active_membership_id = $3, expires_at = $4
            WHERE id_digest = $1 AND person_id = $2
            RETURNING person_id, active_membership_id, issued_at, expires_at
            "#,
        )
        .bind(digest(id.as_str()))
        .bind(*person_id.as_uuid())
        .bind(*membership_id.as_uuid())
        .bind(expires_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("switch_active_membership", e))?;
        row.as_ref().map(|row| session_from_row(id, row)).transpose()
    }

    #[instrument(skip(self, id), err)]
    async fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id_digest = $1")
            .bind(digest(id.as_str()))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_session", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired_sessions", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AssignmentStore for PostgresStore {
    #[instrument(skip(self), fields(vendor_id = %vendor_id), err)]
    async fn list_active_project_assignments(
        &self,
        vendor_id: VendorId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ProjectAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT vendor_id, project_id, org_id, starts_at, ends_at, revoked_at
            FROM project_assignments
            WHERE vendor_id = $1
              AND starts_at <= $2
              AND (ends_at IS NULL OR $2 < ends_at)
              AND (revoked_at IS NULL OR $2 < revoked_at)
            ORDER BY project_id
            "#,
        )
        .bind(*vendor_id.as_uuid())
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_project_assignments", e))?;
        rows.iter().map(assignment_from_row).collect()
    }

    #[instrument(
        skip(self, assignment),
        fields(vendor_id = %assignment.vendor_id, project_id = %assignment.project_id),
        err
    )]
    async fn upsert_assignment(&self, assignment: &ProjectAssignment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO project_assignments (vendor_id, project_id, org_id, starts_at, ends_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (vendor_id, project_id) DO UPDATE SET
                org_id = EXCLUDED.org_id,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                revoked_at = EXCLUDED.revoked_at
            "#,
        )
        .bind(*assignment.vendor_id.as_uuid())
        .bind(*assignment.project_id.as_uuid())
        .bind(*assignment.org_id.as_uuid())
        .bind(assignment.starts_at)
        .bind(assignment.ends_at)
        .bind(assignment.revoked_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_assignment", e))?;
        Ok(())
    }
}

async fn find_or_create_person(
    conn: &mut sqlx::PgConnection,
    email: &Email,
    display_name: Option<&str>,
    now: DateTime<Utc>,
) -> StoreResult<Person> {
    let candidate = Person::new(email.clone(), display_name, now);
    sqlx::query(&format!(
        r#"
        INSERT INTO people ({PERSON_COLUMNS})
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email) DO NOTHING
        "#
    ))
    .bind(*candidate.id.as_uuid())
    .bind(candidate.email.as_str())
    .bind(&candidate.display_name)
    .bind(&candidate.avatar)
    .bind(candidate.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_person", e))?;

    let row = sqlx::query(&format!("SELECT {PERSON_COLUMNS} FROM people WHERE email = $1"))
        .bind(email.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_person", e))?;
    person_from_row(&row)
}

// ─────────────────────────────────────────────────────────────────────────────
// Predicate rendering
// ─────────────────────────────────────────────────────────────────────────────

/// A bind value of a rendered predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Uuid(Uuid),
    UuidArray(Vec<Uuid>),
}

/// A parameterised `WHERE` fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Render a gate predicate for tables carrying `org_id`, `account_id`,
/// `vendor_id` and `project_id` columns.
///
/// Placeholders start at `$first_param` so the fragment can be appended to
/// a query that already binds earlier parameters.
pub fn render_predicate(predicate: &Predicate, first_param: usize) -> SqlFragment {
    let p = first_param;
    match predicate {
        Predicate::Organization { org_id } => SqlFragment {
            sql: format!("org_id = ${p}"),
            params: vec![SqlParam::Uuid(*org_id.as_uuid())],
        },
        Predicate::Account { org_id, account_id } => SqlFragment {
            sql: format!("org_id = ${p} AND account_id = ${}", p + 1),
            params: vec![
                SqlParam::Uuid(*org_id.as_uuid()),
                SqlParam::Uuid(*account_id.as_uuid()),
            ],
        },
        Predicate::Vendor { org_id, vendor_id } => SqlFragment {
            sql: format!("org_id = ${p} AND vendor_id = ${}", p + 1),
            params: vec![
                SqlParam::Uuid(*org_id.as_uuid()),
                SqlParam::Uuid(*vendor_id.as_uuid()),
            ],
        },
        Predicate::Projects {
            org_id,
            vendor_id,
            project_ids,
        } => SqlFragment {
            sql: format!(
                "org_id = ${p} AND vendor_id = ${} AND project_id = ANY(${})",
                p + 1,
                p + 2
            ),
            params: vec![
                SqlParam::Uuid(*org_id.as_uuid()),
                SqlParam::Uuid(*vendor_id.as_uuid()),
                SqlParam::UuidArray(project_ids.iter().map(|id| *id.as_uuid()).collect()),
            ],
        },
    }
}

/// Bind a rendered fragment's parameters onto a query, in order.
pub fn bind_fragment<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    fragment: &SqlFragment,
) -> Query<'q, Postgres, PgArguments> {
    for param in &fragment.params {
        query = match param {
            SqlParam::Uuid(id) => query.bind(*id),
            SqlParam::UuidArray(ids) => query.bind(ids.clone()),
        };
    }
    query
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn digest(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

fn scope_columns(scope: &ScopeRef) -> (&'static str, Uuid) {
    match scope {
        ScopeRef::Internal => ("internal", Uuid::nil()),
        ScopeRef::Account(id) => ("account", *id.as_uuid()),
        ScopeRef::Vendor(id) => ("vendor", *id.as_uuid()),
    }
}

fn scope_from_columns(kind: &str, id: Uuid) -> StoreResult<ScopeRef> {
    match kind {
        "internal" => Ok(ScopeRef::Internal),
        "account" => Ok(ScopeRef::Account(AccountId::from_uuid(id))),
        "vendor" => Ok(ScopeRef::Vendor(VendorId::from_uuid(id))),
        other => Err(StoreError::Corrupt(format!("unknown scope kind '{other}'"))),
    }
}

fn corrupt(err: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn grant_from_row(row: &PgRow) -> StoreResult<MembershipGrant> {
    let role: Role = row.try_get::<String, _>("role").map_err(corrupt)?.parse().map_err(corrupt)?;
    let space: Space = row.try_get::<String, _>("space").map_err(corrupt)?.parse().map_err(corrupt)?;
    let scope = scope_from_columns(
        &row.try_get::<String, _>("scope_kind").map_err(corrupt)?,
        row.try_get("scope_id").map_err(corrupt)?,
    )?;
    let org_id = OrganizationId::from_uuid(row.try_get("org_id").map_err(corrupt)?);
    MembershipGrant::new(org_id, role, space, scope).map_err(corrupt)
}

fn person_from_row(row: &PgRow) -> StoreResult<Person> {
    Ok(Person {
        id: PersonId::from_uuid(row.try_get("id").map_err(corrupt)?),
        email: Email::parse(&row.try_get::<String, _>("email").map_err(corrupt)?).map_err(corrupt)?,
        display_name: row.try_get("display_name").map_err(corrupt)?,
        avatar: row.try_get("avatar").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

fn organization_from_row(row: &PgRow) -> StoreResult<Organization> {
    Ok(Organization {
        id: OrganizationId::from_uuid(row.try_get("id").map_err(corrupt)?),
        name: row.try_get("name").map_err(corrupt)?,
        slug: Slug::parse(&row.try_get::<String, _>("slug").map_err(corrupt)?).map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

fn membership_from_row(row: &PgRow) -> StoreResult<Membership> {
    let grant = grant_from_row(row)?;
    Ok(Membership {
        id: MembershipId::from_uuid(row.try_get("id").map_err(corrupt)?),
        person_id: PersonId::from_uuid(row.try_get("person_id").map_err(corrupt)?),
        org_id: grant.org_id,
        role: grant.role,
        space: grant.space,
        scope: grant.scope,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        deactivated_at: row.try_get("deactivated_at").map_err(corrupt)?,
    })
}

fn invitation_from_row(token: &InvitationToken, row: &PgRow) -> StoreResult<Invitation> {
    let invited_by: Option<Uuid> = row.try_get("invited_by").map_err(corrupt)?;
    Ok(Invitation {
        token: token.clone(),
        email: Email::parse(&row.try_get::<String, _>("email").map_err(corrupt)?).map_err(corrupt)?,
        grant: grant_from_row(row)?,
        invited_by: invited_by.map(PersonId::from_uuid),
        created_at: row.try_get("created_at").map_err(corrupt)?,
        expires_at: row.try_get("expires_at").map_err(corrupt)?,
        consumed_at: row.try_get("consumed_at").map_err(corrupt)?,
    })
}

fn session_from_row(id: &SessionId, row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        id: id.clone(),
        person_id: PersonId::from_uuid(row.try_get("person_id").map_err(corrupt)?),
        active_membership_id: MembershipId::from_uuid(
            row.try_get("active_membership_id").map_err(corrupt)?,
        ),
        issued_at: row.try_get("issued_at").map_err(corrupt)?,
        expires_at: row.try_get("expires_at").map_err(corrupt)?,
    })
}

fn assignment_from_row(row: &PgRow) -> StoreResult<ProjectAssignment> {
    Ok(ProjectAssignment {
        vendor_id: VendorId::from_uuid(row.try_get("vendor_id").map_err(corrupt)?),
        project_id: ProjectId::from_uuid(row.try_get("project_id").map_err(corrupt)?),
        org_id: OrganizationId::from_uuid(row.try_get("org_id").map_err(corrupt)?),
        starts_at: row.try_get("starts_at").map_err(corrupt)?,
        ends_at: row.try_get("ends_at").map_err(corrupt)?,
        revoked_at: row.try_get("revoked_at").map_err(corrupt)?,
    })
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some(code) if code.starts_with("08") || code == "57P01" => {
                    StoreError::Unavailable(msg)
                }
                _ => StoreError::Rejected(msg),
            }
        }
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => {
            StoreError::Unavailable(format!("connection failure in {}: {}", operation, err))
        }
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode failure in {}: {}", operation, err))
        }
        _ => StoreError::Rejected(format!("sqlx error in {}: {}", operation, err)),
    }
}
