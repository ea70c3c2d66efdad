//! Service root: builds every component and runs them

use async_trait::async_trait;
use riverwatch_core::{
    HealthStatus, ReadinessStatus, Result, RiverwatchError, RiverwatchService,
};
use riverwatch_db::{DbPool, PoolConfig};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::aggregation::DailyAggregationJob;
use crate::api::{create_router, AppState};
use crate::cache::CacheManager;
use crate::config::IngestConfig;
use crate::fanout::SubscriptionHub;
use crate::ingest::{IngestPipeline, MeasurementWriter};
use crate::store::{AggregateStore, MemoryStore, PersistentStore, PgStore};
use crate::transport::{MessageTransport, MqttTransport};
use crate::SERVICE_ID;

/// Telemetry ingest service
pub struct IngestService {
    config: IngestConfig,
    state: AppState,
    aggregation: Arc<DailyAggregationJob>,
    shutdown: watch::Sender<bool>,
}

impl IngestService {
    /// Wire up all components; must be called inside a Tokio runtime
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;

        let (store, aggregates): (Arc<dyn PersistentStore>, Arc<dyn AggregateStore>) =
            if config.service.has_database() {
                let pool = DbPool::new(PoolConfig::new(
                    config.service.database_url.clone(),
                    config.service.db_pool_size,
                ))
                .map_err(|e| RiverwatchError::Database(e.to_string()))?;
                let pg = Arc::new(PgStore::new(pool));
                (pg.clone() as Arc<dyn PersistentStore>, pg as Arc<dyn AggregateStore>)
            } else {
                warn!("DATABASE_URL not set, using in-memory store; nothing will survive a restart");
                let memory = Arc::new(MemoryStore::new());
                (memory.clone() as Arc<dyn PersistentStore>, memory as Arc<dyn AggregateStore>)
            };

        Ok(Self::with_stores(config, store, aggregates))
    }

    /// Wire up components around the given stores
    pub fn with_stores(
        config: IngestConfig,
        store: Arc<dyn PersistentStore>,
        aggregates: Arc<dyn AggregateStore>,
    ) -> Self {
        let cache = Arc::new(CacheManager::new(
            store.clone(),
            config.baseline_sample_size,
            config.store_timeout,
        ));
        let writer = MeasurementWriter::spawn(
            store.clone(),
            config.write_queue_capacity,
            config.max_concurrent_writes,
            config.store_timeout,
        );
        let hub = Arc::new(SubscriptionHub::new(
            config.subscriber_buffer,
            config.broadcast_timeout,
        ));
        let pipeline = Arc::new(IngestPipeline::new(
            cache,
            writer,
            hub.clone(),
            config.save_interval_secs,
            config.signal_placeholder,
        ));
        let transport: Arc<dyn MessageTransport> = Arc::new(MqttTransport::new(config.mqtt.clone()));
        let aggregation = Arc::new(DailyAggregationJob::new(
            aggregates.clone(),
            config.store_timeout,
        ));
        let (shutdown, _) = watch::channel(false);

        let state = AppState {
            pipeline,
            hub,
            transport,
            store,
            aggregates,
            store_timeout: config.store_timeout,
            broadcast_timeout: config.broadcast_timeout,
            started_at: Instant::now(),
        };

        Self {
            config,
            state,
            aggregation,
            shutdown,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn start_transport(&self) {
        let transport = self.state.transport.clone();
        let pipeline = self.state.pipeline.clone();

        transport.subscribe(&self.config.mqtt.topics);
        transport.on_message(Arc::new(move |topic: &str, payload: &[u8]| {
            pipeline.dispatch(topic, payload);
        }));

        tokio::spawn(async move {
            if let Err(e) = transport.run().await {
                error!(error = %e, "Message transport stopped; no further readings will arrive");
            }
        });
    }

    fn start_aggregation(&self) {
        if !self.config.aggregation_enabled {
            info!("Daily aggregation disabled");
            return;
        }
        let job = self.aggregation.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(job.run_scheduler(shutdown));
    }
}

#[async_trait]
impl RiverwatchService for IngestService {
    fn service_id(&self) -> &'static str {
        SERVICE_ID
    }

    async fn health(&self) -> HealthStatus {
        self.state.health()
    }

    async fn ready(&self) -> ReadinessStatus {
        self.state.readiness().await
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down telemetry ingest");
        self.state.transport.stop();
        self.shutdown.send_replace(true);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(
            http = %self.config.service.http_bind,
            broker = %self.config.mqtt.broker_host,
            topics = ?self.config.mqtt.topics,
            "Starting telemetry ingest"
        );

        self.start_transport();
        self.start_aggregation();

        let app = create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.service.http_bind).await?;

        let mut shutdown = self.shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
