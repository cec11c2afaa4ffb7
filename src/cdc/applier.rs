use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::connectors::Connector;
use crate::models::ChangeEvent;
use crate::retry::{with_retry, RetryPolicy};
use crate::schema_manager::SchemaManager;

/// What to do when a change collides with existing target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// The replicated change overwrites the target row (default).
    SourceWins,
    /// Existing target rows are left alone; updates are skipped.
    TargetWins,
}

impl ConflictResolution {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "source_wins" => Ok(ConflictResolution::SourceWins),
            "target_wins" => Ok(ConflictResolution::TargetWins),
            other => Err(format!("Unsupported conflict_resolution: {}", other)),
        }
    }
}

/// Point-in-time view of the applier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub errors: u64,
}

/// Applier counters. A single lock keeps snapshots atomic across all four
/// values.
#[derive(Debug, Default)]
pub struct Statistics {
    inner: Mutex<StatsSnapshot>,
}

impl Statistics {
    fn update(&self, f: impl FnOnce(&mut StatsSnapshot)) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        f(&mut inner);
    }

    pub fn record_insert(&self) {
        self.update(|s| s.inserts += 1);
    }

    pub fn record_update(&self) {
        self.update(|s| s.updates += 1);
    }

    pub fn record_delete(&self) {
        self.update(|s| s.deletes += 1);
    }

    pub fn record_error(&self) {
        self.update(|s| s.errors += 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.lock().expect("stats lock poisoned")
    }

    pub fn reset(&self) {
        self.update(|s| *s = StatsSnapshot::default());
    }
}

/// Applies CDC events to the target database.
///
/// Each event is its own micro-transaction: inserts fall back to updates on
/// duplicate keys, updates fall back to inserts on missing rows, so re-
/// delivered events converge instead of failing.
pub struct CdcApplier {
    target: Arc<dyn Connector>,
    schema_manager: Arc<SchemaManager>,
    apply_deletes: bool,
    conflict_resolution: ConflictResolution,
    retry_policy: RetryPolicy,
    stats: Statistics,
}

impl CdcApplier {
    pub fn new(
        target: Arc<dyn Connector>,
        schema_manager: Arc<SchemaManager>,
        apply_deletes: bool,
        conflict_resolution: ConflictResolution,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            target,
            schema_manager,
            apply_deletes,
            conflict_resolution,
            retry_policy,
            stats: Statistics::default(),
        }
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Process a single CDC event, retrying with backoff on failure and
    /// re-raising once the attempt budget is spent.
    pub async fn process_event(&self, event: &ChangeEvent) -> Result<(), String> {
        with_retry(&self.retry_policy, "process_event", || async move {
            match self.apply_event(event).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    log::error!(
                        "Error processing event for table {}: {}",
                        event.table_name,
                        e
                    );
                    self.stats.record_error();
                    Err(e)
                }
            }
        })
        .await
    }

    async fn apply_event(&self, event: &ChangeEvent) -> Result<(), String> {
        self.ensure_table(event).await?;

        if event.is_insert() || event.is_snapshot() {
            self.handle_insert(event).await
        } else if event.is_update() {
            self.handle_update(event).await
        } else if event.is_delete() {
            self.handle_delete(event).await
        } else {
            Ok(())
        }
    }

    async fn ensure_table(&self, event: &ChangeEvent) -> Result<(), String> {
        if self.target.table_exists(&event.table_name).await? {
            return Ok(());
        }

        log::info!("Table {} not found in target, creating...", event.table_name);
        self.schema_manager
            .get_or_sync_schema(&event.table_name)
            .await?;

        // A warm cache skips the sync path inside get_or_sync_schema, so
        // create explicitly when the table is still missing.
        if !self.target.table_exists(&event.table_name).await? {
            self.schema_manager
                .sync_table_schema(&event.table_name)
                .await?;
        }
        Ok(())
    }

    async fn handle_insert(&self, event: &ChangeEvent) -> Result<(), String> {
        let after = match &event.after {
            Some(after) => after,
            None => {
                log::warn!(
                    "Insert event has no 'after' data for table {}",
                    event.table_name
                );
                return Ok(());
            }
        };

        match self
            .target
            .insert_batch(&event.table_name, std::slice::from_ref(after))
            .await
        {
            Ok(_) => {
                self.stats.record_insert();
                log::debug!("Inserted row into {}", event.table_name);
                Ok(())
            }
            Err(e) => {
                let message = e.to_lowercase();
                // Re-delivered event: the row is already there, update it.
                if message.contains("duplicate key") || message.contains("unique constraint") {
                    log::info!(
                        "Duplicate key on insert, converting to update for {}",
                        event.table_name
                    );
                    self.handle_update(event).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn handle_update(&self, event: &ChangeEvent) -> Result<(), String> {
        let after = match &event.after {
            Some(after) => after,
            None => {
                log::warn!(
                    "Update event has no 'after' data for table {}",
                    event.table_name
                );
                return Ok(());
            }
        };

        let schema = self
            .schema_manager
            .get_or_sync_schema(&event.table_name)
            .await?;
        let pk_values = event.get_primary_key_values(&schema.primary_keys);

        if pk_values.is_empty() {
            log::warn!(
                "No primary key values found for update on {}",
                event.table_name
            );
            return Ok(());
        }

        if self.conflict_resolution == ConflictResolution::TargetWins {
            log::debug!(
                "Conflict resolution: target_wins, skipping update on {}",
                event.table_name
            );
            return Ok(());
        }

        match self
            .target
            .update_row(&event.table_name, &pk_values, after)
            .await
        {
            Ok(()) => {
                self.stats.record_update();
                log::debug!("Updated row in {}", event.table_name);
                Ok(())
            }
            Err(e) => {
                let message = e.to_lowercase();
                if message.contains("no rows") || message.contains("not found") {
                    log::info!(
                        "Row not found on update, inserting for {}",
                        event.table_name
                    );
                    self.target
                        .insert_batch(&event.table_name, std::slice::from_ref(after))
                        .await?;
                    self.stats.record_insert();
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn handle_delete(&self, event: &ChangeEvent) -> Result<(), String> {
        if !self.apply_deletes {
            log::debug!(
                "Delete operations disabled, skipping delete for {}",
                event.table_name
            );
            return Ok(());
        }

        if event.before.is_none() {
            log::warn!(
                "Delete event has no 'before' data for table {}",
                event.table_name
            );
            return Ok(());
        }

        let schema = self
            .schema_manager
            .get_or_sync_schema(&event.table_name)
            .await?;
        let pk_values = event.get_primary_key_values(&schema.primary_keys);

        if pk_values.is_empty() {
            log::warn!(
                "No primary key values found for delete on {}",
                event.table_name
            );
            return Ok(());
        }

        match self.target.delete_row(&event.table_name, &pk_values).await {
            Ok(()) => {
                self.stats.record_delete();
                log::debug!("Deleted row from {}", event.table_name);
                Ok(())
            }
            Err(e) => {
                // A missing row on delete is already the desired end state.
                log::warn!("Error deleting row from {}: {}", event.table_name, e);
                Ok(())
            }
        }
    }
}
