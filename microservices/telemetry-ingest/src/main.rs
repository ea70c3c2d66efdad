//! Telemetry Ingest Microservice

use riverwatch_core::MicroserviceRuntime;
use std::sync::Arc;
use telemetry_ingest::{IngestConfig, IngestService, SERVICE_ID};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    riverwatch_telemetry::init(SERVICE_ID)?;

    let config = IngestConfig::from_env()?;
    info!(
        save_interval_secs = config.save_interval_secs,
        baseline_sample_size = config.baseline_sample_size,
        store = if config.service.has_database() { "postgres" } else { "memory" },
        "Configuration loaded"
    );

    let service = Arc::new(IngestService::new(config)?);
    MicroserviceRuntime::run(service).await?;
    Ok(())
}
