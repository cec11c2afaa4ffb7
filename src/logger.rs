use log::{Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::config::LoggingConfig;

pub fn format_timestamp() -> String {
    let now = SystemTime::now();
    let datetime = chrono::DateTime::<chrono::Local>::from(now);
    datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_uppercase().as_str() {
        "TRACE" => log::LevelFilter::Trace,
        "DEBUG" => log::LevelFilter::Debug,
        "INFO" => log::LevelFilter::Info,
        "WARN" | "WARNING" => log::LevelFilter::Warn,
        "ERROR" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Logger that writes every record to stderr and, when configured, appends
/// the same record to a log file. `format: json` emits one JSON object per
/// line; the default is a plain timestamped text line.
pub struct SyncLogger {
    level: log::LevelFilter,
    json: bool,
    file: Option<Mutex<File>>,
}

impl SyncLogger {
    fn new(config: &LoggingConfig) -> Result<Self, String> {
        let file = match config.file.as_deref() {
            Some(path) if !path.is_empty() => {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| format!("Failed to create log directory: {}", e))?;
                    }
                }
                let handle = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| format!("Failed to open log file {}: {}", path, e))?;
                Some(Mutex::new(handle))
            }
            _ => None,
        };

        Ok(Self {
            level: parse_level(&config.level),
            json: config.format.eq_ignore_ascii_case("json"),
            file,
        })
    }

    fn format_record(&self, record: &Record) -> String {
        if self.json {
            serde_json::json!({
                "timestamp": format_timestamp(),
                "level": record.level().to_string(),
                "target": record.target(),
                "message": format!("{}", record.args()),
            })
            .to_string()
        } else {
            format!(
                "[{}] [{}] {} - {}",
                format_timestamp(),
                record.level(),
                record.target(),
                record.args()
            )
        }
    }
}

impl Log for SyncLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = self.format_record(record);
        eprintln!("{}", line);

        if let Some(file) = &self.file {
            if let Ok(mut handle) = file.lock() {
                let _ = writeln!(handle, "{}", line);
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut handle) = file.lock() {
                let _ = handle.flush();
            }
        }
    }
}

/// Install the logger as the global `log` backend. A second call (e.g. from
/// a test harness) only adjusts the max level.
pub fn init_logger(config: &LoggingConfig) -> Result<(), String> {
    let level = parse_level(&config.level);
    let logger = SyncLogger::new(config)?;

    // Already-set logger: keep the existing backend, honor the new level.
    let _ = log::set_boxed_logger(Box::new(logger));
    log::set_max_level(level);
    Ok(())
}
