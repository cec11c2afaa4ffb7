use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row travelling through the pipeline: ordered column -> JSON value.
/// serde_json is built with `preserve_order`, so iteration follows insertion
/// order and positional inserts see columns in declaration order.
pub type Row = serde_json::Map<String, Value>;

/// Column definition in a table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Dialect-tagged type string, e.g. `VARCHAR(255)` or `TIMESTAMP(6)`.
    pub data_type: String,
    pub nullable: bool,
    /// Literal or expression text, straight from the catalog.
    pub default: Option<String>,
    pub is_primary_key: bool,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: &str, nullable: bool, default: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            default,
            is_primary_key: false,
        }
    }
}

/// Secondary index metadata, carried through schema sync but only created
/// explicitly by operators today.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Table schema definition.
///
/// Column order is significant: it reflects declaration order in the source
/// database and drives positional inserts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_keys: Vec<String>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableSchema {
    /// Build a schema and mark every column referenced by `primary_keys`.
    pub fn new(name: &str, columns: Vec<ColumnDefinition>, primary_keys: Vec<String>) -> Self {
        let mut schema = Self {
            name: name.to_string(),
            columns,
            primary_keys,
            indexes: Vec::new(),
        };
        for col in &mut schema.columns {
            if schema.primary_keys.contains(&col.name) {
                col.is_primary_key = true;
            }
        }
        schema
    }

    /// First column with the given name, or `None`.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column; no-op when a column with the same name exists.
    pub fn add_column(&mut self, column: ColumnDefinition) {
        if self.get_column(&column.name).is_none() {
            self.columns.push(column);
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// CDC operation types, in the upstream producer's single-letter encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    /// Insert ("c")
    Create,
    /// Update ("u")
    Update,
    /// Delete ("d")
    Delete,
    /// Initial snapshot read ("r")
    Read,
}

impl OperationType {
    /// Decode the producer's operation code. Unknown codes decode to `Read`
    /// so a new upstream op never aborts the stream.
    pub fn from_op_code(op: &str) -> Self {
        match op {
            "c" => OperationType::Create,
            "u" => OperationType::Update,
            "d" => OperationType::Delete,
            "r" => OperationType::Read,
            _ => OperationType::Read,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Read => "read",
        }
    }
}

/// A single row change decoded from the upstream CDC envelope.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub operation: OperationType,
    pub table_name: String,
    pub before: Option<Row>,
    pub after: Option<Row>,
    pub source_metadata: Option<Row>,
    pub timestamp: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
}

fn as_row(value: Option<&Value>) -> Option<Row> {
    match value {
        Some(Value::Object(map)) => Some(map.clone()),
        _ => None,
    }
}

impl ChangeEvent {
    /// Parse a producer envelope. The envelope carries a `payload` object
    /// with `op`, `before`, `after`, `source` and optional `transaction`
    /// metadata; missing or malformed fields fall back to empty values
    /// rather than failing, since the applier validates what it needs.
    pub fn from_debezium_message(message: &Value) -> Self {
        let payload = message.get("payload").unwrap_or(message);

        let operation =
            OperationType::from_op_code(payload.get("op").and_then(Value::as_str).unwrap_or(""));

        let source = as_row(payload.get("source"));
        let table_name = source
            .as_ref()
            .and_then(|s| s.get("table"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let ts_ms = payload
            .get("ts_ms")
            .and_then(Value::as_i64)
            .or_else(|| {
                source
                    .as_ref()
                    .and_then(|s| s.get("ts_ms"))
                    .and_then(Value::as_i64)
            });
        let timestamp = ts_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        let transaction_id = payload
            .get("transaction")
            .and_then(|t| t.get("id"))
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        Self {
            operation,
            table_name,
            before: as_row(payload.get("before")),
            after: as_row(payload.get("after")),
            source_metadata: source,
            timestamp,
            transaction_id,
        }
    }

    /// Extract primary-key values, preferring the `after` image.
    /// Keys absent from the row image are omitted.
    pub fn get_primary_key_values(&self, primary_keys: &[String]) -> Row {
        let data = match self.after.as_ref().or(self.before.as_ref()) {
            Some(d) => d,
            None => return Row::new(),
        };

        let mut values = Row::new();
        for pk in primary_keys {
            if let Some(v) = data.get(pk) {
                values.insert(pk.clone(), v.clone());
            }
        }
        values
    }

    pub fn is_insert(&self) -> bool {
        self.operation == OperationType::Create
    }

    pub fn is_update(&self) -> bool {
        self.operation == OperationType::Update
    }

    pub fn is_delete(&self) -> bool {
        self.operation == OperationType::Delete
    }

    /// True for rows emitted by the producer's initial snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.operation == OperationType::Read
    }
}
