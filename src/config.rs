use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_ssl_mode() -> Option<String> {
    Some("prefer".to_string())
}

fn default_schema() -> Option<String> {
    Some("public".to_string())
}

/// Database connection configuration (used for both source and target).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// One of `postgresql` / `postgres` / `mysql`.
    #[serde(rename = "type")]
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: Option<String>,
    /// Logical schema for dialects that have one (PostgreSQL).
    #[serde(default = "default_schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub server_id: Option<u32>,
    #[serde(default)]
    pub replica_set: Option<String>,
}

impl DatabaseConfig {
    pub fn schema_name(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }
}

fn default_offset_reset() -> String {
    "earliest".to_string()
}

fn default_max_poll_records() -> u32 {
    500
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KafkaConfig {
    #[serde(default)]
    pub bootstrap_servers: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default)]
    pub enable_auto_commit: bool,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: String::new(),
            group_id: String::new(),
            auto_offset_reset: default_offset_reset(),
            enable_auto_commit: false,
            max_poll_records: default_max_poll_records(),
        }
    }
}

fn default_connector_class() -> String {
    "io.debezium.connector.postgresql.PostgresConnector".to_string()
}

fn default_server_name() -> String {
    "dbsync".to_string()
}

fn default_topic_prefix() -> String {
    "dbsync".to_string()
}

fn default_slot_name() -> Option<String> {
    Some("dbsync_slot".to_string())
}

fn default_plugin_name() -> Option<String> {
    Some("pgoutput".to_string())
}

fn default_publication_name() -> Option<String> {
    Some("dbsync_publication".to_string())
}

fn default_snapshot_mode() -> String {
    "initial".to_string()
}

fn default_offset_storage() -> String {
    "org.apache.kafka.connect.storage.FileOffsetBackingStore".to_string()
}

fn default_offset_storage_file() -> String {
    "offsets.dat".to_string()
}

fn default_offset_flush_interval_ms() -> u64 {
    10_000
}

fn default_schema_history() -> String {
    "io.debezium.storage.file.history.FileSchemaHistory".to_string()
}

fn default_schema_history_file() -> String {
    "schema-history.dat".to_string()
}

fn default_decimal_handling_mode() -> String {
    "double".to_string()
}

fn default_time_precision_mode() -> String {
    "adaptive".to_string()
}

/// Settings forwarded to the embedded CDC producer. Keys are written in
/// engine snake_case here and rewritten to the producer's dot.notation by
/// `cdc::producer::build_debezium_properties`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DebeziumConfig {
    #[serde(default = "default_connector_class")]
    pub connector_class: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_slot_name")]
    pub slot_name: Option<String>,
    #[serde(default = "default_plugin_name")]
    pub plugin_name: Option<String>,
    #[serde(default = "default_publication_name")]
    pub publication_name: Option<String>,
    #[serde(default = "default_snapshot_mode")]
    pub snapshot_mode: String,
    #[serde(default = "default_offset_storage")]
    pub offset_storage: String,
    #[serde(default = "default_offset_storage_file")]
    pub offset_storage_file_filename: String,
    #[serde(default = "default_offset_flush_interval_ms")]
    pub offset_flush_interval_ms: u64,
    #[serde(default = "default_schema_history")]
    pub schema_history_internal: String,
    #[serde(default = "default_schema_history_file")]
    pub schema_history_internal_file_filename: String,
    #[serde(default = "default_decimal_handling_mode")]
    pub decimal_handling_mode: String,
    #[serde(default = "default_time_precision_mode")]
    pub time_precision_mode: String,
    #[serde(default = "default_true")]
    pub include_schema_changes: bool,
    /// Command that hosts the embedded producer process. When unset the
    /// bridge starts without a local producer (envelopes must arrive via an
    /// externally driven sink).
    #[serde(default)]
    pub launch_command: Option<String>,
}

impl Default for DebeziumConfig {
    fn default() -> Self {
        Self {
            connector_class: default_connector_class(),
            server_name: default_server_name(),
            topic_prefix: default_topic_prefix(),
            slot_name: default_slot_name(),
            plugin_name: default_plugin_name(),
            publication_name: default_publication_name(),
            snapshot_mode: default_snapshot_mode(),
            offset_storage: default_offset_storage(),
            offset_storage_file_filename: default_offset_storage_file(),
            offset_flush_interval_ms: default_offset_flush_interval_ms(),
            schema_history_internal: default_schema_history(),
            schema_history_internal_file_filename: default_schema_history_file(),
            decimal_handling_mode: default_decimal_handling_mode(),
            time_precision_mode: default_time_precision_mode(),
            include_schema_changes: true,
            launch_command: None,
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_parallel_tables() -> usize {
    4
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InitialLoadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallel_tables")]
    pub parallel_tables: usize,
    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl Default for InitialLoadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            parallel_tables: default_parallel_tables(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

fn default_conflict_resolution() -> String {
    "source_wins".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CdcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_create_tables: bool,
    #[serde(default = "default_true")]
    pub auto_detect_schema_changes: bool,
    #[serde(default = "default_true")]
    pub apply_deletes: bool,
    /// `source_wins` (default) or `target_wins`.
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: String,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_create_tables: true,
            auto_detect_schema_changes: true,
            apply_deletes: true,
            conflict_resolution: default_conflict_resolution(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub initial_load: InitialLoadConfig,
    #[serde(default)]
    pub cdc: CdcConfig,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_health_port() -> u16 {
    8080
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_health_port")]
    pub health_check_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            metrics_port: default_metrics_port(),
            health_check_port: default_health_port(),
        }
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Optional log file; records always go to stderr as well.
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_max_workers() -> usize {
    10
}

fn default_queue_size() -> usize {
    10_000
}

fn default_batch_timeout_seconds() -> u64 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Bridge queue capacity (envelopes buffered between producer and applier).
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_batch_timeout_seconds")]
    pub batch_timeout_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
            batch_timeout_seconds: default_batch_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

fn default_state_path() -> String {
    "data/state".to_string()
}

fn default_offset_path() -> String {
    "data/offsets".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub storage_path: String,
    #[serde(default = "default_offset_path")]
    pub offset_storage_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            storage_path: default_state_path(),
            offset_storage_path: default_offset_path(),
        }
    }
}

/// Top-level configuration, one YAML document.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub source: DatabaseConfig,
    pub target: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub debezium: DebeziumConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_yaml(path: &str) -> Result<Self, String> {
        if !Path::new(path).exists() {
            return Err(format!("Configuration file not found: {}", path));
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path, e))?;

        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, String> {
        let config: Config =
            serde_yaml::from_str(raw).map_err(|e| format!("Invalid configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        for (label, db) in [("source", &self.source), ("target", &self.target)] {
            crate::connectors::DatabaseType::parse(&db.db_type)
                .map_err(|e| format!("{} database: {}", label, e))?;
        }
        match self.sync.cdc.conflict_resolution.as_str() {
            "source_wins" | "target_wins" => Ok(()),
            other => Err(format!(
                "Unsupported conflict_resolution: {} (expected source_wins or target_wins)",
                other
            )),
        }
    }
}
