use clap::Parser;
use tokio::sync::watch;

use dbsync::config::Config;
use dbsync::engine::SyncEngine;
use dbsync::logger;

/// Heterogeneous database replication: parallel initial load + CDC apply.
#[derive(Parser, Debug)]
#[command(name = "dbsync", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    log::info!("Received SIGINT, shutting down gracefully...");
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Received SIGINT, shutting down gracefully...");
                }
                _ = sigterm.recv() => {
                    log::info!("Received SIGTERM, shutting down gracefully...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Received interrupt, shutting down gracefully...");
        }

        let _ = shutdown_tx.send(true);
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::from_yaml(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if let Err(e) = logger::init_logger(&config.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let engine = match SyncEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Fatal error: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    if let Err(e) = engine.run(shutdown_rx).await {
        log::error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}
