use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cdc::producer::CdcProducer;

/// How long the consumer waits on the queue before re-checking the running
/// flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Producer-facing side of the bridge queue. Carries raw JSON strings only,
/// so the producer's threading model never leaks into the consumer. Sends
/// block while the queue is full.
#[derive(Clone)]
pub struct EnvelopeSink {
    tx: mpsc::Sender<String>,
}

impl EnvelopeSink {
    pub async fn send(&self, envelope: String) -> Result<(), String> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| "Change queue closed".to_string())
    }

    /// Variant for producers running on their own OS threads.
    pub fn blocking_send(&self, envelope: String) -> Result<(), String> {
        self.tx
            .blocking_send(envelope)
            .map_err(|_| "Change queue closed".to_string())
    }
}

/// Receives decoded envelopes from the bridge's consumer task.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, envelope: serde_json::Value) -> Result<(), String>;
}

/// Bridges an opaque upstream CDC producer into the applier with bounded
/// memory and clean shutdown.
///
/// The producer callback enqueues raw JSON strings into a bounded queue; a
/// single consumer task dequeues with a short timeout, parses, and invokes
/// the registered change handler. Per-table ordering is preserved because
/// there is exactly one consumer.
pub struct ChangeStreamBridge {
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    running: Arc<AtomicBool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    producer: Mutex<Option<Arc<dyn CdcProducer>>>,
}

impl ChangeStreamBridge {
    pub fn new(queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            running: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(None),
            producer: Mutex::new(None),
        }
    }

    /// Attach the upstream producer to start/stop together with the bridge.
    pub fn set_producer(&self, producer: Arc<dyn CdcProducer>) {
        *self.producer.lock().expect("producer lock poisoned") = Some(producer);
    }

    pub fn sink(&self) -> EnvelopeSink {
        EnvelopeSink {
            tx: self.tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the consumer task and, when attached, the upstream producer.
    pub async fn start(&self, handler: Arc<dyn ChangeHandler>) -> Result<(), String> {
        let rx = self
            .rx
            .lock()
            .expect("receiver lock poisoned")
            .take()
            .ok_or("Bridge already started")?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(consume_changes(rx, running, handler));
        *self.consumer.lock().expect("consumer lock poisoned") = Some(handle);

        let producer = self.producer.lock().expect("producer lock poisoned").clone();
        if let Some(producer) = producer {
            producer.start(self.sink()).await?;
        }

        log::info!("Change-stream bridge started");
        Ok(())
    }

    /// Stop accepting new events, close the producer and join the consumer.
    pub async fn stop(&self) {
        log::info!("Stopping change-stream bridge");
        self.running.store(false, Ordering::SeqCst);

        let producer = self.producer.lock().expect("producer lock poisoned").clone();
        if let Some(producer) = producer {
            producer.stop().await;
        }

        let handle = self.consumer.lock().expect("consumer lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Change consumer task failed: {}", e);
            }
        }

        log::info!("Change-stream bridge stopped");
    }
}

async fn consume_changes(
    mut rx: mpsc::Receiver<String>,
    running: Arc<AtomicBool>,
    handler: Arc<dyn ChangeHandler>,
) {
    log::info!("Change consumer task started");

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(DEQUEUE_TIMEOUT, rx.recv()).await {
            Ok(Some(raw)) => match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(envelope) => {
                    if let Err(e) = handler.handle(envelope).await {
                        log::error!("Error processing change: {}", e);
                    }
                }
                Err(e) => {
                    log::error!("Error decoding JSON payload: {}", e);
                }
            },
            Ok(None) => break,
            // Timeout: loop around and re-check the running flag.
            Err(_) => continue,
        }
    }

    log::info!("Change consumer task stopped");
}
