//! Strata runtime host.
//!
//! Opens the configured store, keeps soft-deleted rows swept and runs until
//! interrupted.

use strata_engine::Model;
use strata_runtime::{Config, SoftDeleteReaper, StoreHandle, StoreLocation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let model: Model = serde_json::from_str(&std::fs::read_to_string(&config.model_path)?)?;
    tracing::info!(
        model = %config.model_path.display(),
        version = model.version,
        entities = model.entities.len(),
        "Loaded model"
    );

    let location = match &config.store_path {
        Some(path) => StoreLocation::File(path.clone()),
        None => StoreLocation::InMemory,
    };
    let store = StoreHandle::open(location, model);

    let _reaper = SoftDeleteReaper::with_retention(
        store.root_context(),
        config.deletion_retention,
    )
    .spawn(config.reap_interval);

    tracing::info!(
        location = ?store.coordinator().location(),
        reap_interval = ?config.reap_interval,
        "Store open"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
