//! External Transport
//!
//! Forwards bus traffic to an external pub/sub channel (Redis `PUBLISH`).
//! Publishes go through a bounded outbound queue drained by one supervising
//! worker so failures are counted and nothing is dropped at shutdown.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Outbound queue closed")]
    Closed,

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Channel carrying all traffic of one article
pub fn article_channel(article_id: &uuid::Uuid) -> String {
    format!("article:{}", article_id)
}

/// Channel carrying traffic of one reflection
pub fn reflection_channel(reflection_id: &uuid::Uuid) -> String {
    format!("reflection:{}", reflection_id)
}

/// Best-effort external publisher
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError>;
}

/// Redis pub/sub transport
#[derive(Clone)]
pub struct RedisTransport {
    conn: ConnectionManager,
}

impl RedisTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis transport connected: {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!("Published to {} ({} receivers)", channel, receivers);
        Ok(())
    }
}

/// Transport used when no external broker is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        debug!("[{}] {} bytes", channel, payload.len());
        Ok(())
    }
}

/// One pending external publish
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub payload: String,
}

/// Outbound delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub delivered: u64,
    pub failed: u64,
    /// Rejected because the queue was already shut down
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded queue + drain worker in front of a [`Transport`]
pub struct OutboundQueue {
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl OutboundQueue {
    /// Spawn the drain worker. Must be called inside a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(drain(transport, rx, Arc::clone(&counters)));

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters,
        }
    }

    /// Queue an envelope, waiting for capacity if the queue is full
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), TransportError> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Closed);
        };

        tx.send(envelope).await.map_err(|_| {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            TransportError::Closed
        })
    }

    /// Close the queue and wait for everything already queued to drain
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Outbound worker ended abnormally: {}", e);
            }
        }
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn drain(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<Envelope>,
    counters: Arc<Counters>,
) {
    debug!("Outbound worker started ({})", transport.name());

    while let Some(envelope) = rx.recv().await {
        match transport.publish(&envelope.channel, &envelope.payload).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Error publishing to {} via {}: {}", envelope.channel, transport.name(), e);
            }
        }
    }

    debug!("Outbound worker stopped ({})", transport.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyTransport {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn publish(&self, channel: &str, _payload: &str) -> Result<(), TransportError> {
            self.seen.lock().push(channel.to_string());
            if channel.starts_with("reflection:") {
                Err(TransportError::Publish("broker down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn envelope(channel: &str) -> Envelope {
        Envelope {
            channel: channel.to_string(),
            payload: "{}".to_string(),
        }
    }

    #[test]
    fn test_channel_names() {
        let id = uuid::Uuid::nil();
        assert_eq!(article_channel(&id), format!("article:{}", id));
        assert_eq!(reflection_channel(&id), format!("reflection:{}", id));
    }

    #[tokio::test]
    async fn test_drain_counts_failures_and_flushes_on_shutdown() {
        let transport = Arc::new(FlakyTransport { seen: Mutex::new(Vec::new()) });
        let queue = OutboundQueue::start(transport.clone(), 2);

        queue.enqueue(envelope("article:a")).await.unwrap();
        queue.enqueue(envelope("reflection:r")).await.unwrap();
        queue.enqueue(envelope("article:b")).await.unwrap();
        queue.shutdown().await;

        let stats = queue.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(transport.seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let queue = OutboundQueue::start(Arc::new(LogTransport), 4);
        queue.shutdown().await;

        let result = queue.enqueue(envelope("article:x")).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert_eq!(queue.stats().dropped, 1);
    }
}
