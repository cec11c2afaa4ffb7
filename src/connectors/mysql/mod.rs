pub mod extract;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Connection, Executor, MySqlConnection, Row as SqlxRow};
use tokio::sync::Mutex;
use urlencoding::encode;

use crate::config::DatabaseConfig;
use crate::connectors::common::{decode_blob_wire_format, is_select_query};
use crate::connectors::{Connector, DatabaseType, RowStream};
use crate::models::{ColumnDefinition, Row, TableSchema};

use extract::row_to_map;

// Helper function to escape backticks in identifiers for MySQL
fn escape_identifier(name: &str) -> String {
    name.replace('`', "``")
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", escape_identifier(name))
}

fn build_mysql_url(params: &DatabaseConfig) -> String {
    let user = encode(&params.username);
    let pass = encode(&params.password);
    format!(
        "mysql://{}:{}@{}:{}/{}",
        user, pass, params.host, params.port, params.database
    )
}

/// Integer base types whose primary-key columns become AUTO_INCREMENT.
fn is_auto_increment_type(data_type: &str) -> bool {
    let base = data_type
        .to_uppercase()
        .split('(')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    matches!(base.as_str(), "INT" | "BIGINT" | "SMALLINT")
}

fn render_column_def(column: &ColumnDefinition) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.data_type);

    // Integer primary keys are rendered NOT NULL AUTO_INCREMENT and never
    // carry a default; the converter has already dropped sequence defaults.
    if column.is_primary_key && is_auto_increment_type(&column.data_type) {
        def.push_str(" NOT NULL AUTO_INCREMENT");
        return def;
    }

    if !column.nullable || column.is_primary_key {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    def
}

/// CREATE TABLE statement with the storage and charset clause used for all
/// replicated tables.
pub fn build_create_table_sql(schema: &TableSchema) -> String {
    let mut parts: Vec<String> = schema.columns.iter().map(render_column_def).collect();

    if !schema.primary_keys.is_empty() {
        let pks: Vec<String> = schema.primary_keys.iter().map(|pk| quote_ident(pk)).collect();
        parts.push(format!("PRIMARY KEY ({})", pks.join(", ")));
    }

    format!(
        "CREATE TABLE {} ({}) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        quote_ident(&schema.name),
        parts.join(", ")
    )
}

pub fn build_add_column_sql(table: &str, column: &ColumnDefinition) -> String {
    let mut def = column.data_type.clone();
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(&column.name),
        def
    )
}

fn push_bind_value(qb: &mut sqlx::QueryBuilder<'_, sqlx::MySql>, value: &serde_json::Value) {
    use serde_json::Value;
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(v) => {
            qb.push_bind(*v);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                qb.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                qb.push_bind(f);
            } else {
                qb.push_bind(n.to_string());
            }
        }
        Value::String(s) => {
            if let Some(bytes) = decode_blob_wire_format(s) {
                qb.push_bind(bytes);
            } else {
                qb.push_bind(s.clone());
            }
        }
        // Arrays and objects bind as JSON
        other => {
            qb.push_bind(other.clone());
        }
    }
}

/// MySQL database connector.
pub struct MySqlConnector {
    config: DatabaseConfig,
    conn: Arc<Mutex<Option<MySqlConnection>>>,
}

impl MySqlConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            conn: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    /// Open a fresh native connection and return an isolated connector
    /// bound to it. The first call on an unconnected instance also adopts
    /// the connection as this instance's primary.
    async fn connect(&self) -> Result<Box<dyn Connector>, String> {
        let url = build_mysql_url(&self.config);
        let native = MySqlConnection::connect(&url).await.map_err(|e| {
            log::error!("Failed to connect to MySQL: {}", e);
            e.to_string()
        })?;

        log::info!(
            "Connected to MySQL at {}:{}",
            self.config.host,
            self.config.port
        );

        let mut primary = self.conn.lock().await;
        if primary.is_none() {
            *primary = Some(native);
            drop(primary);
            return Ok(Box::new(Self {
                config: self.config.clone(),
                conn: Arc::clone(&self.conn),
            }));
        }

        Ok(Box::new(Self {
            config: self.config.clone(),
            conn: Arc::new(Mutex::new(Some(native))),
        }))
    }

    async fn disconnect(&self) -> Result<(), String> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await.map_err(|e| e.to_string())?;
            log::info!("Disconnected from MySQL");
        }
        Ok(())
    }

    async fn get_all_tables(&self) -> Result<Vec<String>, String> {
        let query = "
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = ?
            AND table_type = 'BASE TABLE'
            ORDER BY table_name
        ";

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let rows = sqlx::query(query)
            .bind(&self.config.database)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(rows.iter().map(|r| mysql_row_str(r, 0)).collect())
    }

    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, String> {
        // column_type (not data_type) keeps length and sign, e.g. VARCHAR(255)
        let query = "
            SELECT
                column_name,
                column_type,
                is_nullable,
                column_default,
                column_key,
                extra
            FROM information_schema.columns
            WHERE table_schema = ? AND table_name = ?
            ORDER BY ordinal_position
        ";

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let rows = sqlx::query(query)
            .bind(&self.config.database)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut primary_keys = Vec::new();

        for row in &rows {
            let name = mysql_row_str(row, 0);
            let data_type = mysql_row_str(row, 1).to_uppercase();
            let extra = mysql_row_str(row, 5);
            let is_auto_increment = extra.contains("auto_increment");

            let default = if is_auto_increment {
                None
            } else {
                match mysql_row_str_opt(row, 3) {
                    Some(val) if !val.is_empty() && !val.eq_ignore_ascii_case("null") => Some(val),
                    _ => None,
                }
            };

            if mysql_row_str(row, 4) == "PRI" {
                primary_keys.push(name.clone());
            }

            columns.push(ColumnDefinition::new(
                &name,
                &data_type,
                mysql_row_str(row, 2) == "YES",
                default,
            ));
        }

        Ok(TableSchema::new(table, columns, primary_keys))
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>, String> {
        let query = "
            SELECT column_name
            FROM information_schema.key_column_usage
            WHERE table_schema = ?
            AND table_name = ?
            AND constraint_name = 'PRIMARY'
            ORDER BY ordinal_position
        ";

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let rows = sqlx::query(query)
            .bind(&self.config.database)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(rows.iter().map(|r| mysql_row_str(r, 0)).collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, String> {
        let query = "
            SELECT COUNT(*)
            FROM information_schema.tables
            WHERE table_schema = ?
            AND table_name = ?
        ";

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let row = sqlx::query(query)
            .bind(&self.config.database)
            .bind(table)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(row.get::<i64, _>(0) > 0)
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), String> {
        let sql = build_create_table_sql(schema);

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        conn.execute(sql.as_str()).await.map_err(|e| e.to_string())?;
        log::info!("Created table {}", schema.name);
        Ok(())
    }

    async fn alter_table_add_column(
        &self,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<(), String> {
        let sql = build_add_column_sql(table, column);

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        conn.execute(sql.as_str()).await.map_err(|e| e.to_string())?;
        log::info!("Added column {} to {}", column.name, table);
        Ok(())
    }

    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<u64, String> {
        if rows.is_empty() {
            return Ok(0);
        }

        let columns: Vec<String> = rows[0].keys().cloned().collect();
        let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

        let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new(format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_ident(table),
            column_list.join(", ")
        ));

        for (ri, row) in rows.iter().enumerate() {
            if ri > 0 {
                qb.push(", ");
            }
            qb.push("(");
            for (ci, col) in columns.iter().enumerate() {
                if ci > 0 {
                    qb.push(", ");
                }
                push_bind_value(&mut qb, row.get(col).unwrap_or(&serde_json::Value::Null));
            }
            qb.push(")");
        }

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let result = qb
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(result.rows_affected())
    }

    async fn update_row(
        &self,
        table: &str,
        primary_keys: &Row,
        values: &Row,
    ) -> Result<(), String> {
        let mut qb =
            sqlx::QueryBuilder::<sqlx::MySql>::new(format!("UPDATE {} SET ", quote_ident(table)));

        for (i, (col, val)) in values.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(format!("{} = ", quote_ident(col)));
            push_bind_value(&mut qb, val);
        }

        qb.push(" WHERE ");
        for (i, (col, val)) in primary_keys.iter().enumerate() {
            if i > 0 {
                qb.push(" AND ");
            }
            qb.push(format!("{} = ", quote_ident(col)));
            push_bind_value(&mut qb, val);
        }

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let result = qb
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        if result.rows_affected() == 0 {
            return Err(format!("No rows matched for update on {}", table));
        }
        Ok(())
    }

    async fn delete_row(&self, table: &str, primary_keys: &Row) -> Result<(), String> {
        let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new(format!(
            "DELETE FROM {} WHERE ",
            quote_ident(table)
        ));

        for (i, (col, val)) in primary_keys.iter().enumerate() {
            if i > 0 {
                qb.push(" AND ");
            }
            qb.push(format!("{} = ", quote_ident(col)));
            push_bind_value(&mut qb, val);
        }

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        qb.build()
            .execute(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Stream the table in keyed pages over a dedicated read connection.
    /// MySQL has no named cursors, so pagination does the batching; primary
    /// key order keeps pages stable.
    async fn fetch_all_rows(
        &self,
        table: &str,
        batch_size: usize,
    ) -> Result<Box<dyn RowStream>, String> {
        let primary_keys = self.get_primary_keys(table).await?;

        let url = build_mysql_url(&self.config);
        let conn = MySqlConnection::connect(&url).await.map_err(|e| e.to_string())?;

        let mut base_query = format!("SELECT * FROM {}", quote_ident(table));
        if !primary_keys.is_empty() {
            let order: Vec<String> = primary_keys.iter().map(|pk| quote_ident(pk)).collect();
            base_query.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        Ok(Box::new(MySqlPageStream {
            conn,
            base_query,
            batch_size: batch_size.max(1),
            offset: 0,
            done: false,
        }))
    }

    async fn get_row_count(&self, table: &str) -> Result<u64, String> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(table));

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        let row = sqlx::query(&query)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| e.to_string())?;

        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn execute_query(&self, query: &str) -> Result<Vec<Row>, String> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;

        if is_select_query(query) {
            let rows = conn.fetch_all(query).await.map_err(|e| e.to_string())?;
            Ok(rows.iter().map(row_to_map).collect())
        } else {
            conn.execute(query).await.map_err(|e| e.to_string())?;
            Ok(Vec::new())
        }
    }

    async fn begin_transaction(&self) -> Result<(), String> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;
        conn.execute("START TRANSACTION")
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), String> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;
        conn.execute("COMMIT").await.map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), String> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or("Not connected to MySQL")?;
        conn.execute("ROLLBACK").await.map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Read a string from a MySQL row by index.
/// MySQL 8 information_schema returns VARBINARY/BLOB instead of VARCHAR,
/// so try_get::<String> fails silently. This falls back to reading raw bytes.
fn mysql_row_str(row: &sqlx::mysql::MySqlRow, idx: usize) -> String {
    row.try_get::<String, _>(idx).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

/// Optional string variant of mysql_row_str.
fn mysql_row_str_opt(row: &sqlx::mysql::MySqlRow, idx: usize) -> Option<String> {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(val) => val,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
    }
}

/// Paged batch iterator over a dedicated connection.
struct MySqlPageStream {
    conn: MySqlConnection,
    base_query: String,
    batch_size: usize,
    offset: u64,
    done: bool,
}

#[async_trait]
impl RowStream for MySqlPageStream {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>, String> {
        if self.done {
            return Ok(None);
        }

        let query = format!(
            "{} LIMIT {} OFFSET {}",
            self.base_query, self.batch_size, self.offset
        );
        let rows = self
            .conn
            .fetch_all(query.as_str())
            .await
            .map_err(|e| e.to_string())?;

        if rows.len() < self.batch_size {
            self.done = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        self.offset += rows.len() as u64;
        Ok(Some(rows.iter().map(row_to_map).collect()))
    }
}
