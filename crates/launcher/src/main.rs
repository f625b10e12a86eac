use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

use workload_engine::flags::PostgresFeatureFlags;
use workload_engine::metrics::OtelMetricClient;
use workload_engine::PostgresWorkloadQueueStore;
use workload_launcher::{
    init_telemetry, HttpSubstrate, Launcher, LauncherConfig, LauncherDeps, TelemetryConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(TelemetryConfig::from_env());

    let config = LauncherConfig::from_env().context("Invalid launcher configuration")?;

    tracing::info!(
        dataplane_id = %config.dataplane_id,
        groups = ?config.dataplane_groups,
        substrate = %config.substrate_url,
        max_concurrency = config.executor_max_concurrency,
        "workload-launcher starting"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let flags = PostgresFeatureFlags::new(pool.clone());
    let store = Arc::new(PostgresWorkloadQueueStore::new(pool));
    store.migrate().await.context("Failed to run migrations")?;

    let substrate = HttpSubstrate::new(&config.substrate_url, config.substrate_timeout)
        .context("Failed to build substrate client")?;

    let launcher = Launcher::new(
        &config,
        LauncherDeps {
            store,
            substrate: Arc::new(substrate),
            flags: Arc::new(flags),
            metrics: Arc::new(OtelMetricClient::new()),
        },
    )?;
    launcher.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    launcher.shutdown().await;
    tracing::info!("workload-launcher shutdown complete");
    Ok(())
}
