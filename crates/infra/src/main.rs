use std::sync::Arc;

use anyhow::Context;

use atrium_auth::{InvitationRequest, Role, ScopeRef, Space};
use atrium_infra::{AccessEngine, EngineConfig, LogNotifier, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    atrium_observability::init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;

    let org_slug = std::env::var("ATRIUM_ORG_SLUG").context("ATRIUM_ORG_SLUG must be set")?;
    let org_name = std::env::var("ATRIUM_ORG_NAME").unwrap_or_else(|_| org_slug.clone());
    let admin_email =
        std::env::var("ATRIUM_ADMIN_EMAIL").context("ATRIUM_ADMIN_EMAIL must be set")?;

    let store = PostgresStore::connect(&database_url)
        .await
        .context("failed to connect to the database")?;
    store.migrate().await.context("migration failed")?;
    tracing::info!("schema up to date");

    let engine = AccessEngine::builder(Arc::new(store))
        .notifier(Arc::new(LogNotifier))
        .config(config)
        .build();

    let org = engine
        .ensure_organization(&org_name, &org_slug)
        .await
        .context("failed to ensure organization")?;

    let issued = engine
        .issue_system_invitation(InvitationRequest {
            email: admin_email,
            org_id: org.id,
            role: Role::Admin,
            space: Space::Internal,
            scope: ScopeRef::Internal,
            ttl: None,
        })
        .await
        .context("failed to issue admin invitation")?;

    tracing::info!(
        org_id = %org.id,
        expires_at = %issued.invitation.expires_at,
        "admin invitation issued"
    );
    println!("{}", issued.redeem_url);
    Ok(())
}
