use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;

use crate::config::InitialLoadConfig;
use crate::connectors::Connector;
use crate::models::Row;
use crate::schema_manager::SchemaManager;

const PROGRESS_INTERVAL_ROWS: u64 = 10_000;

/// Filter tables based on include/exclude lists.
pub fn filter_tables(all_tables: &[String], config: &InitialLoadConfig) -> Vec<String> {
    all_tables
        .iter()
        .filter(|t| config.include_tables.is_empty() || config.include_tables.contains(t))
        .filter(|t| !config.exclude_tables.contains(t))
        .cloned()
        .collect()
}

/// Handles the initial full data load from source to target.
///
/// Tables load independently: each worker acquires its own isolated target
/// connection, streams the source in batches and commits per batch. A
/// failing table lands in `failed_tables` without cancelling its siblings.
pub struct InitialLoadHandler {
    source: Arc<dyn Connector>,
    target: Arc<dyn Connector>,
    schema_manager: Arc<SchemaManager>,
    config: InitialLoadConfig,
    completed_tables: Mutex<HashSet<String>>,
    failed_tables: Mutex<HashSet<String>>,
}

impl InitialLoadHandler {
    pub fn new(
        source: Arc<dyn Connector>,
        target: Arc<dyn Connector>,
        schema_manager: Arc<SchemaManager>,
        config: InitialLoadConfig,
    ) -> Self {
        Self {
            source,
            target,
            schema_manager,
            config,
            completed_tables: Mutex::new(HashSet::new()),
            failed_tables: Mutex::new(HashSet::new()),
        }
    }

    pub fn completed_tables(&self) -> HashSet<String> {
        self.completed_tables
            .lock()
            .expect("completed set lock poisoned")
            .clone()
    }

    pub fn failed_tables(&self) -> HashSet<String> {
        self.failed_tables
            .lock()
            .expect("failed set lock poisoned")
            .clone()
    }

    fn mark_completed(&self, table: &str) {
        self.completed_tables
            .lock()
            .expect("completed set lock poisoned")
            .insert(table.to_string());
    }

    fn mark_failed(&self, table: &str) {
        self.failed_tables
            .lock()
            .expect("failed set lock poisoned")
            .insert(table.to_string());
    }

    /// Check if initial load is needed: any source table missing from the
    /// target, or any co-named target table empty while the source has rows.
    pub async fn is_initial_load_needed(&self) -> Result<bool, String> {
        if !self.config.enabled {
            return Ok(false);
        }

        let source_tables: HashSet<String> =
            self.source.get_all_tables().await?.into_iter().collect();
        let target_tables: HashSet<String> =
            self.target.get_all_tables().await?.into_iter().collect();

        let missing = source_tables.difference(&target_tables).count();
        if missing > 0 {
            log::info!("Found {} tables missing in target", missing);
            return Ok(true);
        }

        for table in source_tables.intersection(&target_tables) {
            if self.target.get_row_count(table).await? == 0
                && self.source.get_row_count(table).await? > 0
            {
                log::info!("Table {} is empty in target but has data in source", table);
                return Ok(true);
            }
        }

        log::info!("Initial load not needed, all tables exist and have data");
        Ok(false)
    }

    /// Perform the initial full data load for all selected tables.
    pub async fn perform_initial_load(&self) -> Result<(), String> {
        log::info!("Starting initial data load");

        let all_tables = self.source.get_all_tables().await?;
        let mut tables = filter_tables(&all_tables, &self.config);

        log::info!("Found {} tables to load", tables.len());
        if tables.is_empty() {
            log::warn!("No tables to load");
            return Ok(());
        }

        // Schema sync runs sequentially before any data moves; a failing
        // table is excluded from the load set.
        log::info!("Syncing table schemas...");
        for table in &tables {
            if let Err(e) = self.schema_manager.sync_table_schema(table).await {
                log::error!("Failed to sync schema for {}: {}", table, e);
                self.mark_failed(table);
            }
        }
        let failed = self.failed_tables();
        tables.retain(|t| !failed.contains(t));

        if self.config.parallel_tables > 1 {
            self.load_tables_parallel(&tables).await;
        } else {
            self.load_tables_sequential(&tables).await;
        }

        let completed = self.completed_tables();
        let failed = self.failed_tables();
        log::info!(
            "Initial load completed: {} succeeded, {} failed",
            completed.len(),
            failed.len()
        );
        if !failed.is_empty() {
            let mut names: Vec<&String> = failed.iter().collect();
            names.sort();
            log::error!(
                "Failed tables: {}",
                names
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(())
    }

    async fn load_tables_sequential(&self, tables: &[String]) {
        for table in tables {
            if let Err(e) = self.load_table(table).await {
                log::error!("Error loading table {}: {}", table, e);
            }
        }
    }

    async fn load_tables_parallel(&self, tables: &[String]) {
        futures::stream::iter(tables)
            .for_each_concurrent(self.config.parallel_tables, |table| async move {
                if let Err(e) = self.load_table(table).await {
                    log::error!("Error loading table {}: {}", table, e);
                }
            })
            .await;
    }

    /// Load data for a single table over an isolated target connection.
    pub async fn load_table(&self, table: &str) -> Result<(), String> {
        log::info!("Loading table: {}", table);

        // Row count goes through the shared source connection, which is
        // fine for single-threaded administrative reads.
        let total_rows = match self.source.get_row_count(table).await {
            Ok(count) => count,
            Err(e) => {
                log::error!("Failed to load table {}: {}", table, e);
                self.mark_failed(table);
                return Err(e);
            }
        };
        log::info!("Table {} has {} rows", table, total_rows);

        if total_rows == 0 {
            log::info!("Table {} is empty, skipping data load", table);
            self.mark_completed(table);
            return Ok(());
        }

        // Workers never touch the shared target connection; each acquires
        // its own and releases it on every exit path.
        let target_conn = match self.target.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Failed to load table {}: {}", table, e);
                self.mark_failed(table);
                return Err(e);
            }
        };

        let result = self
            .copy_rows(target_conn.as_ref(), table, total_rows)
            .await;

        if result.is_err() {
            let _ = target_conn.rollback_transaction().await;
        }
        if let Err(e) = target_conn.disconnect().await {
            log::warn!("Error releasing connection for {}: {}", table, e);
        }

        match result {
            Ok(rows_loaded) => {
                log::info!("Successfully loaded {} rows into {}", rows_loaded, table);
                self.mark_completed(table);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load table {}: {}", table, e);
                self.mark_failed(table);
                Err(e)
            }
        }
    }

    async fn copy_rows(
        &self,
        target: &dyn Connector,
        table: &str,
        total_rows: u64,
    ) -> Result<u64, String> {
        let mut stream = self
            .source
            .fetch_all_rows(table, self.config.batch_size)
            .await?;

        let mut rows_loaded: u64 = 0;
        let mut next_progress = PROGRESS_INTERVAL_ROWS;

        while let Some(batch) = stream.next_batch().await? {
            match self.write_batch(target, table, &batch).await {
                Ok(inserted) => rows_loaded += inserted,
                Err(e) => {
                    log::error!("Error inserting batch for {}: {}", table, e);
                    let _ = target.rollback_transaction().await;
                    return Err(e);
                }
            }

            if rows_loaded >= next_progress {
                let progress = (rows_loaded as f64 / total_rows as f64) * 100.0;
                log::info!(
                    "Progress for {}: {}/{} ({:.1}%)",
                    table,
                    rows_loaded,
                    total_rows,
                    progress
                );
                next_progress += PROGRESS_INTERVAL_ROWS;
            }
        }

        Ok(rows_loaded)
    }

    /// One batch is one transaction on the worker's isolated connection.
    async fn write_batch(
        &self,
        target: &dyn Connector,
        table: &str,
        batch: &[Row],
    ) -> Result<u64, String> {
        target.begin_transaction().await?;
        let inserted = target.insert_batch(table, batch).await?;
        target.commit_transaction().await?;
        Ok(inserted)
    }
}
