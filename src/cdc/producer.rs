use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cdc::bridge::EnvelopeSink;
use crate::config::Config;
use crate::connectors::DatabaseType;

/// The upstream CDC producer, treated as an opaque process that emits one
/// JSON envelope per row change into the bridge sink.
#[async_trait]
pub trait CdcProducer: Send + Sync {
    async fn start(&self, sink: EnvelopeSink) -> Result<(), String>;
    async fn stop(&self);
}

/// Rewrite the engine's snake_case producer settings into the dot.notation
/// properties the producer expects. Database connection parameters are
/// forcibly taken from the `source` block regardless of what the producer
/// section supplied.
pub fn build_debezium_properties(config: &Config) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();

    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(&config.debezium) {
        for (key, value) in map {
            // Engine-only knob, never forwarded.
            if key == "launch_command" {
                continue;
            }
            let rendered = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            props.insert(key.replace('_', "."), rendered);
        }
    }

    props.insert("database.hostname".to_string(), config.source.host.clone());
    props.insert("database.port".to_string(), config.source.port.to_string());
    props.insert("database.user".to_string(), config.source.username.clone());
    props.insert(
        "database.password".to_string(),
        config.source.password.clone(),
    );
    props.insert(
        "database.dbname".to_string(),
        config.source.database.clone(),
    );

    props.insert("name".to_string(), "dbsync-engine".to_string());
    props.insert(
        "connector.class".to_string(),
        config.debezium.connector_class.clone(),
    );
    props.insert(
        "database.server.name".to_string(),
        config.debezium.server_name.clone(),
    );
    props.insert(
        "topic.naming.strategy".to_string(),
        "io.debezium.schema.DefaultTopicNamingStrategy".to_string(),
    );

    // JSON converters so every envelope arrives as self-contained JSON.
    for side in ["key", "value"] {
        props.insert(
            format!("{}.converter", side),
            "org.apache.kafka.connect.json.JsonConverter".to_string(),
        );
        props.insert(format!("{}.converter.schemas.enable", side), "true".to_string());
    }

    if matches!(
        DatabaseType::parse(&config.source.db_type),
        Ok(DatabaseType::PostgreSql)
    ) {
        if let Some(plugin) = &config.debezium.plugin_name {
            props.insert("plugin.name".to_string(), plugin.clone());
        }
        if let Some(slot) = &config.debezium.slot_name {
            props.insert("slot.name".to_string(), slot.clone());
        }
        if let Some(publication) = &config.debezium.publication_name {
            props.insert("publication.name".to_string(), publication.clone());
        }
    }

    props
}

/// Write properties as `key=value` lines for the producer process.
pub fn write_properties_file(
    path: &Path,
    props: &BTreeMap<String, String>,
) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create state directory: {}", e))?;
        }
    }

    let mut contents = String::new();
    for (key, value) in props {
        contents.push_str(&format!("{}={}\n", key, value));
    }

    std::fs::write(path, contents)
        .map_err(|e| format!("Failed to write properties file {:?}: {}", path, e))
}

/// Hosts the producer as a child process. The configured command is spawned
/// with the properties file path appended as its last argument; every
/// newline-delimited envelope on its stdout is forwarded into the bridge
/// sink, which blocks while the queue is full.
pub struct SubprocessProducer {
    command: String,
    properties_path: PathBuf,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubprocessProducer {
    pub fn new(command: &str, properties_path: PathBuf) -> Self {
        Self {
            command: command.to_string(),
            properties_path,
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CdcProducer for SubprocessProducer {
    async fn start(&self, sink: EnvelopeSink) -> Result<(), String> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or("Empty producer launch command")?;

        let mut child = Command::new(program)
            .args(parts)
            .arg(&self.properties_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|e| format!("Failed to start CDC producer process: {}", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or("Failed to open producer stdout")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown.lock().expect("shutdown lock poisoned") = Some(shutdown_tx);

        log::info!("CDC producer process started: {}", self.command);

        let handle = tokio::spawn(forward_envelopes(child, stdout, shutdown_rx, sink));
        *self.task.lock().expect("task lock poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        let shutdown = self.shutdown.lock().expect("shutdown lock poisoned").take();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }

        let task = self.task.lock().expect("task lock poisoned").take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                log::error!("Producer forwarding task failed: {}", e);
            }
        }
        log::info!("CDC producer process stopped");
    }
}

async fn forward_envelopes(
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    mut shutdown_rx: oneshot::Receiver<()>,
    sink: EnvelopeSink,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                log::info!("Producer shutdown requested, terminating child");
                let _ = child.kill().await;
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let envelope = line.trim();
                        if envelope.is_empty() {
                            continue;
                        }
                        if sink.send(envelope.to_string()).await.is_err() {
                            log::warn!("Change queue closed, stopping producer forwarding");
                            let _ = child.kill().await;
                            break;
                        }
                    }
                    Ok(None) => {
                        log::warn!("CDC producer process closed its output");
                        break;
                    }
                    Err(e) => {
                        log::error!("Failed to read from producer stdout: {}", e);
                        break;
                    }
                }
            }
        }
    }

    let _ = child.wait().await;
}
