use dotenvy::dotenv;
use sim_inventory::{
    config::{database, settings},
    errors::Result,
    inventory::SimInventory,
    scheduler,
};
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

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();

    // 3. Load the service settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    info!(
        registries = settings.registries.len(),
        vendors = settings.profile_vendors.len(),
        "Settings loaded"
    );

    // 4. Initialize database
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Register configured registries and vendors, bind adapters
    let inventory = SimInventory::from_settings(db, &settings).await?;
    for (name, healthy) in inventory.registry_health().await {
        if healthy {
            info!(registry = %name, "Registry reachable");
        } else {
            warn!(registry = %name, "Registry failed its health check");
        }
    }

    // 6. Run the reconciliation loop until interrupted
    let reconciler =
        scheduler::spawn_reconciler(inventory, settings.reconciliation.interval());
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    reconciler.shutdown().await;

    Ok(())
}
