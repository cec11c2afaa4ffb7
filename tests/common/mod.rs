//! In-memory mock connector used by the integration tests. Behaves like a
//! tiny database: tables with schemas and rows, primary-key enforcement on
//! insert, and "no rows" errors on missing updates, so the fallback ladders
//! in the applier can be exercised without a server.

// Each integration test binary compiles this module independently and uses
// a different subset of it.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dbsync::connectors::{Connector, DatabaseType, RowStream};
use dbsync::models::{ColumnDefinition, Row, TableSchema};

#[derive(Clone)]
pub struct MockTable {
    pub schema: TableSchema,
    pub rows: Vec<Row>,
}

#[derive(Default)]
pub struct MockDatabase {
    tables: Mutex<HashMap<String, MockTable>>,
    /// (table, connection id) per insert_batch call.
    pub insert_log: Mutex<Vec<(String, u64)>>,
    /// (table, rendered column) per alter_table_add_column call.
    pub alter_log: Mutex<Vec<(String, String)>>,
    schema_fetches: Mutex<HashMap<String, u64>>,
    fail_inserts_on: Mutex<HashSet<String>>,
    next_conn_id: AtomicU64,
    pub connect_count: AtomicU64,
}

impl MockDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_table(&self, schema: TableSchema, rows: Vec<Row>) {
        self.tables
            .lock()
            .unwrap()
            .insert(schema.name.clone(), MockTable { schema, rows });
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn schema(&self, table: &str) -> Option<TableSchema> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.schema.clone())
    }

    pub fn schema_fetch_count(&self, table: &str) -> u64 {
        *self
            .schema_fetches
            .lock()
            .unwrap()
            .get(table)
            .unwrap_or(&0)
    }

    pub fn fail_inserts_on(&self, table: &str) {
        self.fail_inserts_on
            .lock()
            .unwrap()
            .insert(table.to_string());
    }

    pub fn insert_connections_for(&self, table: &str) -> HashSet<u64> {
        self.insert_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, conn)| *conn)
            .collect()
    }

    pub fn insert_calls_for(&self, table: &str) -> usize {
        self.insert_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .count()
    }
}

pub struct MockConnector {
    db: Arc<MockDatabase>,
    db_type: DatabaseType,
    conn_id: u64,
    connected: AtomicBool,
}

impl MockConnector {
    pub fn new(db: Arc<MockDatabase>, db_type: DatabaseType) -> Arc<Self> {
        Arc::new(Self {
            db,
            db_type,
            conn_id: 0,
            connected: AtomicBool::new(true),
        })
    }

    pub fn database(&self) -> Arc<MockDatabase> {
        Arc::clone(&self.db)
    }

    fn ensure_connected(&self) -> Result<(), String> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("Not connected".to_string())
        }
    }

    fn pk_matches(row: &Row, keys: &Row) -> bool {
        keys.iter().all(|(k, v)| row.get(k) == Some(v))
    }
}

struct MockRowStream {
    batches: Vec<Vec<Row>>,
}

#[async_trait]
impl RowStream for MockRowStream {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>, String> {
        if self.batches.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.batches.remove(0)))
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn connect(&self) -> Result<Box<dyn Connector>, String> {
        self.db.connect_count.fetch_add(1, Ordering::SeqCst);
        let conn_id = self.db.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(Self {
            db: Arc::clone(&self.db),
            db_type: self.db_type,
            conn_id,
            connected: AtomicBool::new(true),
        }))
    }

    async fn disconnect(&self) -> Result<(), String> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get_all_tables(&self) -> Result<Vec<String>, String> {
        self.ensure_connected()?;
        let mut names: Vec<String> = self.db.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, String> {
        self.ensure_connected()?;
        *self
            .db
            .schema_fetches
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_insert(0) += 1;

        self.db
            .schema(table)
            .ok_or_else(|| format!("Table {} does not exist", table))
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>, String> {
        self.ensure_connected()?;
        Ok(self
            .db
            .schema(table)
            .map(|s| s.primary_keys)
            .unwrap_or_default())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, String> {
        self.ensure_connected()?;
        Ok(self.db.tables.lock().unwrap().contains_key(table))
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), String> {
        self.ensure_connected()?;
        let mut tables = self.db.tables.lock().unwrap();
        if tables.contains_key(&schema.name) {
            return Err(format!("Table {} already exists", schema.name));
        }
        tables.insert(
            schema.name.clone(),
            MockTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn alter_table_add_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), String> {
        self.ensure_connected()?;
        let mut tables = self.db.tables.lock().unwrap();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table {} does not exist", table))?;
        entry.schema.add_column(column.clone());
        self.db.alter_log.lock().unwrap().push((
            table.to_string(),
            format!("{} {}", column.name, column.data_type),
        ));
        Ok(())
    }

    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<u64, String> {
        self.ensure_connected()?;
        if self.db.fail_inserts_on.lock().unwrap().contains(table) {
            return Err(format!("Injected insert failure for {}", table));
        }

        self.db
            .insert_log
            .lock()
            .unwrap()
            .push((table.to_string(), self.conn_id));

        let mut tables = self.db.tables.lock().unwrap();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table {} does not exist", table))?;

        for row in rows {
            if !entry.schema.primary_keys.is_empty() {
                let mut keys = Row::new();
                for pk in &entry.schema.primary_keys {
                    if let Some(v) = row.get(pk) {
                        keys.insert(pk.clone(), v.clone());
                    }
                }
                if !keys.is_empty()
                    && entry
                        .rows
                        .iter()
                        .any(|existing| Self::pk_matches(existing, &keys))
                {
                    return Err(format!(
                        "duplicate key value violates unique constraint on {}",
                        table
                    ));
                }
            }
            entry.rows.push(row.clone());
        }

        Ok(rows.len() as u64)
    }

    async fn update_row(
        &self,
        table: &str,
        primary_keys: &Row,
        values: &Row,
    ) -> Result<(), String> {
        self.ensure_connected()?;
        let mut tables = self.db.tables.lock().unwrap();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table {} does not exist", table))?;

        let row = entry
            .rows
            .iter_mut()
            .find(|row| Self::pk_matches(row, primary_keys));

        match row {
            Some(row) => {
                for (k, v) in values {
                    row.insert(k.clone(), v.clone());
                }
                Ok(())
            }
            None => Err(format!("No rows matched for update on {}", table)),
        }
    }

    async fn delete_row(&self, table: &str, primary_keys: &Row) -> Result<(), String> {
        self.ensure_connected()?;
        let mut tables = self.db.tables.lock().unwrap();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table {} does not exist", table))?;
        entry
            .rows
            .retain(|row| !Self::pk_matches(row, primary_keys));
        Ok(())
    }

    async fn fetch_all_rows(
        &self,
        table: &str,
        batch_size: usize,
    ) -> Result<Box<dyn RowStream>, String> {
        self.ensure_connected()?;
        let rows = self.db.rows(table);
        let batches = rows
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(Box::new(MockRowStream { batches }))
    }

    async fn get_row_count(&self, table: &str) -> Result<u64, String> {
        self.ensure_connected()?;
        Ok(self.db.rows(table).len() as u64)
    }

    async fn execute_query(&self, _query: &str) -> Result<Vec<Row>, String> {
        self.ensure_connected()?;
        Ok(Vec::new())
    }

    async fn begin_transaction(&self) -> Result<(), String> {
        self.ensure_connected()
    }

    async fn commit_transaction(&self) -> Result<(), String> {
        self.ensure_connected()
    }

    async fn rollback_transaction(&self) -> Result<(), String> {
        // Rollback must stay callable from error-path cleanup even after
        // the handle was released.
        Ok(())
    }
}

/// Build a row from (column, value) pairs.
pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    let mut map = Row::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.clone());
    }
    map
}

/// A users-style schema with an integer primary key.
pub fn users_schema(name: &str) -> TableSchema {
    TableSchema::new(
        name,
        vec![
            ColumnDefinition::new("id", "INTEGER", false, None),
            ColumnDefinition::new("name", "VARCHAR(100)", true, None),
        ],
        vec!["id".to_string()],
    )
}

/// Generate `count` sequential rows for a users-style table.
pub fn users_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            row(&[
                ("id", serde_json::json!(i as i64)),
                ("name", serde_json::json!(format!("user-{}", i))),
            ])
        })
        .collect()
}
