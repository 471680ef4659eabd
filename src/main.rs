use pool_buddy::{
    config::{badges, database, settings::EngineSettings},
    engine::Engine,
    errors::Result,
    events::PoolEvent,
};
use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (non-fatal, env vars can be set externally)
    dotenv().ok();

    // 3. Engine settings
    let settings = EngineSettings::from_env()
        .inspect_err(|e| error!("Invalid engine settings: {}", e))?;
    info!(?settings, "Loaded engine settings");

    // 4. Database and schema
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database schema ready"))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Badge catalog
    let catalog = badges::load_catalog(&settings.badge_config_path)?;
    let engine = Engine::new(db, settings);
    let inserted = engine.seed_badges(&catalog).await?;
    info!(badges = catalog.len(), inserted, "Badge catalog seeded");

    // 6. Heal running totals from the ledger
    let repaired = engine.reconcile_all().await?;
    for report in &repaired {
        warn!(
            pool_id = report.pool_id,
            stored = report.stored_pool_cents,
            ledger = report.ledger_pool_cents,
            memberships = report.repaired_memberships,
            "Repaired pool totals from ledger"
        );
    }
    let pools = engine.pools().await?;
    info!(pools = pools.len(), repaired = repaired.len(), "Ledger reconciled");

    // 7. Log activity of every existing pool until Ctrl-C
    for pool in &pools {
        let mut subscription = engine.events().join(pool.id, pool.owner_id).await;
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                log_event(&event);
            }
        });
    }

    info!("Engine ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

fn log_event(event: &PoolEvent) {
    info!(
        pool_id = event.pool_id,
        sequence = event.sequence,
        event = event.name(),
        payload = ?event.payload,
        "Pool event"
    );
}
