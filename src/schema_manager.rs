use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::connectors::Connector;
use crate::convert::convert_schema;
use crate::models::TableSchema;

/// Manages schema synchronization between source and target databases.
///
/// Holds the only cache of source schemas; the CDC applier and the
/// initial-load orchestrator both discover structure through it. The cache
/// is guarded by a single writer lock: reads dominate, writes happen during
/// the sequential schema-sync pass and lazily on CDC.
pub struct SchemaManager {
    source: Arc<dyn Connector>,
    target: Arc<dyn Connector>,
    auto_detect_changes: bool,
    cache: Mutex<HashMap<String, TableSchema>>,
}

impl SchemaManager {
    pub fn new(
        source: Arc<dyn Connector>,
        target: Arc<dyn Connector>,
        auto_detect_changes: bool,
    ) -> Self {
        Self {
            source,
            target,
            auto_detect_changes,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, table: &str) -> Option<TableSchema> {
        self.cache
            .lock()
            .expect("schema cache lock poisoned")
            .get(table)
            .cloned()
    }

    fn store(&self, schema: TableSchema) {
        self.cache
            .lock()
            .expect("schema cache lock poisoned")
            .insert(schema.name.clone(), schema);
    }

    /// Get the source schema for a table, from cache when possible. A cache
    /// miss fetches from the source and, when the target lacks the table,
    /// triggers a full schema sync.
    pub async fn get_or_sync_schema(&self, table: &str) -> Result<TableSchema, String> {
        if let Some(schema) = self.cached(table) {
            return Ok(schema);
        }

        let schema = self.source.get_table_schema(table).await?;
        self.store(schema.clone());

        if !self.target.table_exists(table).await? {
            self.sync_table_schema(table).await?;
        }

        Ok(self.cached(table).unwrap_or(schema))
    }

    /// Synchronize one table's schema from source to target: create the
    /// table when missing, otherwise apply additive column diffs.
    pub async fn sync_table_schema(&self, table: &str) -> Result<(), String> {
        log::info!("Syncing schema for table: {}", table);

        let source_schema = self.source.get_table_schema(table).await?;

        let target_schema = convert_schema(
            &source_schema,
            self.source.database_type(),
            self.target.database_type(),
        );

        if !self.target.table_exists(table).await? {
            self.target.create_table(&target_schema).await?;
            log::info!("Created table {} in target database", table);
        } else if self.auto_detect_changes {
            self.sync_schema_changes(table, &target_schema).await;
        }

        self.store(source_schema);
        Ok(())
    }

    /// Apply additive drift to an existing target table. Column deletions
    /// and type changes are reported but never applied.
    async fn sync_schema_changes(&self, table: &str, new_schema: &TableSchema) {
        let current_schema = match self.target.get_table_schema(table).await {
            Ok(schema) => schema,
            Err(e) => {
                log::error!("Error syncing schema changes for {}: {}", table, e);
                return;
            }
        };

        for column in &new_schema.columns {
            match current_schema.get_column(&column.name) {
                None => {
                    log::info!("Adding new column {} to table {}", column.name, table);
                    if let Err(e) = self.target.alter_table_add_column(table, column).await {
                        log::error!(
                            "Error adding column {} to table {}: {}",
                            column.name,
                            table,
                            e
                        );
                    }
                }
                Some(existing) if existing.data_type != column.data_type => {
                    log::warn!(
                        "Type change for {}.{} ({} -> {}) not applied automatically",
                        table,
                        column.name,
                        existing.data_type,
                        column.data_type
                    );
                }
                Some(_) => {}
            }
        }

        for column in &current_schema.columns {
            if new_schema.get_column(&column.name).is_none() {
                log::warn!(
                    "Column {}.{} no longer exists in source; drop it manually if intended",
                    table,
                    column.name
                );
            }
        }
    }

    /// Synchronize schemas for every source table, failing on the first
    /// error.
    pub async fn sync_all_schemas(&self) -> Result<(), String> {
        log::info!("Starting full schema synchronization");

        let tables = self.source.get_all_tables().await?;
        log::info!("Found {} tables to sync", tables.len());

        for table in &tables {
            self.sync_table_schema(table).await.map_err(|e| {
                log::error!("Failed to sync schema for {}: {}", table, e);
                e
            })?;
        }
        Ok(())
    }

    /// True iff source and target agree on the set of column names.
    pub async fn validate_schema(&self, table: &str) -> bool {
        let (source_schema, target_schema) = match (
            self.source.get_table_schema(table).await,
            self.target.get_table_schema(table).await,
        ) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(e), _) | (_, Err(e)) => {
                log::error!("Error validating schema for {}: {}", table, e);
                return false;
            }
        };

        let source_cols: HashSet<String> = source_schema.column_names().into_iter().collect();
        let target_cols: HashSet<String> = target_schema.column_names().into_iter().collect();

        if source_cols != target_cols {
            let missing: Vec<&String> = source_cols.difference(&target_cols).collect();
            let extra: Vec<&String> = target_cols.difference(&source_cols).collect();
            log::warn!("Schema mismatch for {}", table);
            log::warn!("Missing in target: {:?}", missing);
            log::warn!("Extra in target: {:?}", extra);
            return false;
        }

        true
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .expect("schema cache lock poisoned")
            .clear();
        log::debug!("Schema cache cleared");
    }
}
