pub mod common;
pub mod mysql;
pub mod postgres;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::models::{ColumnDefinition, Row, TableSchema};

use mysql::MySqlConnector;
use postgres::PostgresConnector;

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    PostgreSql,
    MySql,
}

impl DatabaseType {
    /// Parse a configuration value. Unknown types are a fatal
    /// configuration error.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseType::PostgreSql),
            "mysql" => Ok(DatabaseType::MySql),
            other => Err(format!(
                "Unsupported database type: {}. Supported types: {}",
                other,
                supported_types().join(", ")
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::PostgreSql => "postgresql",
            DatabaseType::MySql => "mysql",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn supported_types() -> Vec<&'static str> {
    vec!["postgresql", "postgres", "mysql"]
}

/// A lazy, finite, non-restartable sequence of row batches produced by
/// `Connector::fetch_all_rows`. Each batch preserves column declaration
/// order. `next_batch` returns `Ok(None)` once the table is exhausted.
#[async_trait]
pub trait RowStream: Send {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>, String>;
}

/// The complete interface every database connector must implement.
///
/// Connection ownership: an instance owns at most one native connection.
/// `connect()` always opens a fresh native connection and returns a new
/// connector bound to it; the first call on a not-yet-connected instance
/// also adopts that connection as the instance's own "primary" connection,
/// used for single-threaded administrative reads. Concurrent workers must
/// acquire their own handle via `connect()` and release it with
/// `disconnect()` on every exit path (rolling back first when leaving a
/// scope on error).
#[async_trait]
pub trait Connector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    async fn connect(&self) -> Result<Box<dyn Connector>, String>;
    async fn disconnect(&self) -> Result<(), String>;

    // --- Schema discovery -----------------------------------------------

    async fn get_all_tables(&self) -> Result<Vec<String>, String>;
    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, String>;
    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>, String>;
    async fn table_exists(&self, table: &str) -> Result<bool, String>;

    // --- DDL (auto-committed point operations) ---------------------------

    async fn create_table(&self, schema: &TableSchema) -> Result<(), String>;
    async fn alter_table_add_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), String>;

    // --- DML --------------------------------------------------------------

    /// Insert rows without committing; the caller owns the surrounding
    /// transaction boundary. Returns the number of rows inserted.
    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<u64, String>;

    /// Update one row by primary key. Commits internally. Errs with a
    /// "no rows" message when nothing matched, so the applier can fall
    /// back to an insert.
    async fn update_row(&self, table: &str, primary_keys: &Row, values: &Row)
        -> Result<(), String>;

    /// Delete one row by primary key. Commits internally.
    async fn delete_row(&self, table: &str, primary_keys: &Row) -> Result<(), String>;

    // --- Reads -------------------------------------------------------------

    /// Stream the whole table in batches of `batch_size`. Never
    /// materializes the table; each concurrent call gets its own
    /// server-side cursor (or dedicated read connection).
    async fn fetch_all_rows(
        &self,
        table: &str,
        batch_size: usize,
    ) -> Result<Box<dyn RowStream>, String>;

    async fn get_row_count(&self, table: &str) -> Result<u64, String>;

    /// Execute a raw query, returning result rows (empty for statements).
    async fn execute_query(&self, query: &str) -> Result<Vec<Row>, String>;

    // --- Transaction control ------------------------------------------------

    async fn begin_transaction(&self) -> Result<(), String>;
    async fn commit_transaction(&self) -> Result<(), String>;
    async fn rollback_transaction(&self) -> Result<(), String>;
}

/// Build a connector for the configured database type. The registry is a
/// compile-time table over the built-in dialects.
pub fn create_connector(config: &DatabaseConfig) -> Result<Arc<dyn Connector>, String> {
    match DatabaseType::parse(&config.db_type)? {
        DatabaseType::PostgreSql => Ok(Arc::new(PostgresConnector::new(config.clone()))),
        DatabaseType::MySql => Ok(Arc::new(MySqlConnector::new(config.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(db_type: &str) -> DatabaseConfig {
        DatabaseConfig {
            db_type: db_type.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "db".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            ssl_mode: None,
            schema: None,
            server_id: None,
            replica_set: None,
        }
    }

    #[test]
    fn parses_known_types() {
        assert_eq!(
            DatabaseType::parse("PostgreSQL").unwrap(),
            DatabaseType::PostgreSql
        );
        assert_eq!(
            DatabaseType::parse("postgres").unwrap(),
            DatabaseType::PostgreSql
        );
        assert_eq!(DatabaseType::parse("MySQL").unwrap(), DatabaseType::MySql);
    }

    #[test]
    fn rejects_unknown_types() {
        let err = DatabaseType::parse("mongodb").unwrap_err();
        assert!(err.contains("mongodb"));
        assert!(err.contains("mysql"));
    }

    #[test]
    fn factory_builds_dialect_connectors() {
        let pg = create_connector(&config("postgresql")).unwrap();
        assert_eq!(pg.database_type(), DatabaseType::PostgreSql);

        let my = create_connector(&config("mysql")).unwrap();
        assert_eq!(my.database_type(), DatabaseType::MySql);

        assert!(create_connector(&config("oracle")).is_err());
    }

}
