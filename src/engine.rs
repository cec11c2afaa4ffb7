use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::cdc::applier::{CdcApplier, ConflictResolution};
use crate::cdc::bridge::{ChangeHandler, ChangeStreamBridge};
use crate::cdc::producer::{build_debezium_properties, write_properties_file, SubprocessProducer};
use crate::config::Config;
use crate::connectors::{create_connector, Connector};
use crate::initial_load::InitialLoadHandler;
use crate::models::ChangeEvent;
use crate::retry::RetryPolicy;
use crate::schema_manager::SchemaManager;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Decodes producer envelopes into change events and forwards them to the
/// applier. A failing event is logged and skipped so the pipeline keeps
/// consuming.
struct ChangeRecordHandler {
    applier: Arc<CdcApplier>,
    events_processed: Arc<AtomicU64>,
}

#[async_trait]
impl ChangeHandler for ChangeRecordHandler {
    async fn handle(&self, envelope: serde_json::Value) -> Result<(), String> {
        // Tombstones arrive as null payloads and carry nothing to apply.
        if envelope.is_null() {
            return Ok(());
        }

        let event = ChangeEvent::from_debezium_message(&envelope);
        if event.table_name.is_empty() {
            log::debug!("Skipping envelope without a table name");
            return Ok(());
        }

        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.applier.process_event(&event).await
    }
}

/// Main engine: wires connectors, schema manager, initial load and the CDC
/// pipeline together and owns their lifecycle.
pub struct SyncEngine {
    config: Config,
    source: Arc<dyn Connector>,
    target: Arc<dyn Connector>,
    applier: Arc<CdcApplier>,
    initial_load: InitialLoadHandler,
    bridge: Arc<ChangeStreamBridge>,
    events_processed: Arc<AtomicU64>,
}

impl SyncEngine {
    pub fn new(config: Config) -> Result<Self, String> {
        let source = create_connector(&config.source)?;
        let target = create_connector(&config.target)?;

        let schema_manager = Arc::new(SchemaManager::new(
            Arc::clone(&source),
            Arc::clone(&target),
            config.sync.cdc.auto_detect_schema_changes,
        ));

        let retry_policy = RetryPolicy::new(
            config.performance.retry_attempts,
            Duration::from_secs(config.performance.retry_delay_seconds),
            2.0,
        );

        let applier = Arc::new(CdcApplier::new(
            Arc::clone(&target),
            Arc::clone(&schema_manager),
            config.sync.cdc.apply_deletes,
            ConflictResolution::parse(&config.sync.cdc.conflict_resolution)?,
            retry_policy,
        ));

        let initial_load = InitialLoadHandler::new(
            Arc::clone(&source),
            Arc::clone(&target),
            Arc::clone(&schema_manager),
            config.sync.initial_load.clone(),
        );

        let bridge = Arc::new(ChangeStreamBridge::new(config.performance.queue_size));

        Ok(Self {
            config,
            source,
            target,
            applier,
            initial_load,
            bridge,
            events_processed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Run the engine until a shutdown signal arrives on `shutdown_rx`.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), String> {
        log::info!("{}", "=".repeat(80));
        log::info!("Starting dbsync replication engine");
        log::info!(
            "Source: {} - {}:{}",
            self.config.source.db_type,
            self.config.source.host,
            self.config.source.port
        );
        log::info!(
            "Target: {} - {}:{}",
            self.config.target.db_type,
            self.config.target.host,
            self.config.target.port
        );
        log::info!("{}", "=".repeat(80));

        let result = self.run_inner(&mut shutdown_rx).await;
        self.shutdown().await;
        result
    }

    async fn run_inner(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<(), String> {
        log::info!("Connecting to source database...");
        // The first connect populates the connector's primary connection,
        // used for administrative reads; the handle itself is not needed.
        self.source.connect().await?;

        log::info!("Connecting to target database...");
        self.target.connect().await?;

        if self.initial_load.is_initial_load_needed().await? {
            log::info!("Performing initial data load...");
            self.initial_load.perform_initial_load().await?;

            let completed = self.initial_load.completed_tables();
            let failed = self.initial_load.failed_tables();
            if completed.is_empty() && !failed.is_empty() {
                return Err("Initial load failed for every table".to_string());
            }
            log::info!("Initial load completed");
        } else {
            log::info!("Skipping initial load (data already exists)");
        }

        if !self.config.sync.cdc.enabled {
            log::info!("CDC disabled, exiting");
            return Ok(());
        }

        log::info!("Starting CDC processing...");
        self.start_cdc().await?;

        log::info!("Waiting for change events...");
        let mut stats_ticker = tokio::time::interval(STATS_INTERVAL);
        stats_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        stats_ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        log::info!("Shutdown signal received");
                        return Ok(());
                    }
                }
                _ = stats_ticker.tick() => {
                    self.log_statistics();
                }
            }
        }
    }

    async fn start_cdc(&self) -> Result<(), String> {
        if let Some(command) = &self.config.debezium.launch_command {
            let properties = build_debezium_properties(&self.config);
            let properties_path = std::path::Path::new(&self.config.state.storage_path)
                .join("producer.properties");
            write_properties_file(&properties_path, &properties)?;

            self.bridge.set_producer(Arc::new(SubprocessProducer::new(
                command,
                properties_path,
            )));
        } else {
            log::warn!(
                "No producer launch command configured; bridge waits for externally fed envelopes"
            );
        }

        let handler = Arc::new(ChangeRecordHandler {
            applier: Arc::clone(&self.applier),
            events_processed: Arc::clone(&self.events_processed),
        });

        self.bridge.start(handler).await
    }

    fn log_statistics(&self) {
        let stats = self.applier.statistics();
        log::info!(
            "CDC Statistics - Events: {}, Inserts: {}, Updates: {}, Deletes: {}, Errors: {}",
            self.events_processed.load(Ordering::Relaxed),
            stats.inserts,
            stats.updates,
            stats.deletes,
            stats.errors
        );
    }

    async fn shutdown(&self) {
        log::info!("Stopping replication engine");

        if self.bridge.is_running() {
            self.bridge.stop().await;
        }

        log::info!("Disconnecting from databases");
        if let Err(e) = self.source.disconnect().await {
            log::error!("Error disconnecting from source: {}", e);
        }
        if let Err(e) = self.target.disconnect().await {
            log::error!("Error disconnecting from target: {}", e);
        }

        let stats = self.applier.statistics();
        let failed = self.initial_load.failed_tables();
        log::info!("{}", "=".repeat(80));
        log::info!("Final Statistics");
        log::info!("{}", "=".repeat(80));
        log::info!(
            "Total Events Processed: {}",
            self.events_processed.load(Ordering::Relaxed)
        );
        log::info!("Inserts: {}", stats.inserts);
        log::info!("Updates: {}", stats.updates);
        log::info!("Deletes: {}", stats.deletes);
        log::info!("Errors: {}", stats.errors);
        if !failed.is_empty() {
            let mut names: Vec<String> = failed.into_iter().collect();
            names.sort();
            log::info!("Failed tables: {}", names.join(", "));
        }
        log::info!("{}", "=".repeat(80));
    }
}
