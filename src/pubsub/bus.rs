//! Message Bus
//!
//! Pub/sub fanout keyed by article id and by reflection id:
//! - Synchronous, per-callback isolated local delivery
//! - Per-article publish ordering
//! - Tracker status updates for reflection replies
//! - Best-effort forwarding to the external transport
//!
//! One bus is built per process with [`MessageBus::start`] and shared by
//! reference; [`MessageBus::shutdown`] drains the outbound queue.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::tracker::{ReflectionTracker, TrackerError};
use super::transport::{
    article_channel, reflection_channel, Envelope, OutboundQueue, Transport, TransportStats,
};
use super::types::{Message, MessageType, ReflectionStatus};

/// Subscriber callback. Runs inside `publish` and must not block.
pub type Callback = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Capacity of the outbound transport queue
    pub outbound_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
        }
    }
}

#[derive(Clone)]
struct Subscriber {
    id: String,
    callback: Callback,
}

/// Ordered subscriber lists keyed by article or reflection id
struct Registry {
    scope: &'static str,
    entries: RwLock<HashMap<Uuid, Vec<Subscriber>>>,
}

impl Registry {
    fn new(scope: &'static str) -> Self {
        Self {
            scope,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn subscribe(&self, key: Uuid, callback: Callback, subscriber_id: Option<&str>) -> String {
        let id = subscriber_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut entries = self.entries.write();
        let subscribers = entries.entry(key).or_default();
        match subscribers.iter_mut().find(|s| s.id == id) {
            Some(existing) => existing.callback = callback,
            None => subscribers.push(Subscriber {
                id: id.clone(),
                callback,
            }),
        }

        debug!("Subscribed {} to {} {}", id, self.scope, key);
        id
    }

    fn unsubscribe(&self, key: Uuid, subscriber_id: Option<&str>) {
        let mut entries = self.entries.write();
        match subscriber_id {
            Some(id) => {
                if let Some(subscribers) = entries.get_mut(&key) {
                    subscribers.retain(|s| s.id != id);
                    if subscribers.is_empty() {
                        entries.remove(&key);
                    }
                }
            }
            None => {
                entries.remove(&key);
            }
        }
    }

    fn count(&self, key: Uuid) -> usize {
        self.entries.read().get(&key).map_or(0, Vec::len)
    }

    /// Invoke every subscriber of `key` once. Returns deliveries made.
    fn fanout(&self, key: Uuid, message: &Message) -> usize {
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let subscribers = match self.entries.read().get(&key) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };

        for subscriber in &subscribers {
            if let Err(e) = (subscriber.callback)(message) {
                error!(
                    "Error in {} subscriber {} callback ({}): {}",
                    self.scope, subscriber.id, message.kind, e
                );
            }
        }
        subscribers.len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Process-wide pub/sub bus shared by all article workflows
pub struct MessageBus {
    articles: Registry,
    reflections: Registry,
    /// Serializes fanout per article id
    lanes: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    tracker: ReflectionTracker,
    outbound: OutboundQueue,
}

impl MessageBus {
    /// Build the bus and spawn its outbound worker
    pub fn start(transport: Arc<dyn Transport>, config: BusConfig) -> Arc<Self> {
        info!(
            "Message bus started (transport: {}, outbound capacity: {})",
            transport.name(),
            config.outbound_capacity
        );

        Arc::new(Self {
            articles: Registry::new("article"),
            reflections: Registry::new("reflection"),
            lanes: Mutex::new(HashMap::new()),
            tracker: ReflectionTracker::new(),
            outbound: OutboundQueue::start(transport, config.outbound_capacity),
        })
    }

    /// Drop all subscribers and flush the outbound queue
    pub async fn shutdown(&self) {
        self.articles.clear();
        self.reflections.clear();
        self.lanes.lock().retain(|_, lane| Arc::strong_count(lane) > 1);
        self.outbound.shutdown().await;

        let stats = self.outbound.stats();
        info!(
            "Message bus stopped (delivered: {}, failed: {}, dropped: {})",
            stats.delivered, stats.failed, stats.dropped
        );
    }

    pub fn tracker(&self) -> &ReflectionTracker {
        &self.tracker
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.outbound.stats()
    }

    // ============ Subscriptions ============

    pub fn subscribe(&self, article_id: Uuid, callback: Callback, subscriber_id: Option<&str>) -> String {
        self.articles.subscribe(article_id, callback, subscriber_id)
    }

    /// Remove one subscriber, or every subscriber of the article when `None`
    pub fn unsubscribe(&self, article_id: Uuid, subscriber_id: Option<&str>) {
        self.articles.unsubscribe(article_id, subscriber_id);
        if subscriber_id.is_none() {
            self.release_lane(article_id);
        }
    }

    pub fn subscribe_reflection(
        &self,
        reflection_id: Uuid,
        callback: Callback,
        subscriber_id: Option<&str>,
    ) -> String {
        self.reflections.subscribe(reflection_id, callback, subscriber_id)
    }

    pub fn unsubscribe_reflection(&self, reflection_id: Uuid, subscriber_id: Option<&str>) {
        self.reflections.unsubscribe(reflection_id, subscriber_id);
    }

    pub fn article_subscriber_count(&self, article_id: Uuid) -> usize {
        self.articles.count(article_id)
    }

    pub fn reflection_subscriber_count(&self, reflection_id: Uuid) -> usize {
        self.reflections.count(reflection_id)
    }

    // ============ Publishing ============

    /// Deliver locally, update the tracker, then forward to the transport.
    ///
    /// Local delivery has already happened when transport forwarding runs and
    /// is never rolled back.
    pub async fn publish(&self, message: Message) {
        {
            let lane = self.lane(message.article_id);
            let _order = lane.lock();

            let delivered = self.articles.fanout(message.article_id, &message);

            if let Some(reflection_id) = message.reflection_id {
                self.reflections.fanout(reflection_id, &message);
                self.apply_reply_status(reflection_id, message.kind);
            }

            debug!(
                "Published {} from {} to {} article subscribers",
                message.kind, message.agent_id, delivered
            );
        }

        self.forward(&message).await;
    }

    fn lane(&self, article_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(self.lanes.lock().entry(article_id).or_default())
    }

    /// Forget an article's lane unless a publish still holds it
    fn release_lane(&self, article_id: Uuid) {
        let mut lanes = self.lanes.lock();
        if lanes.get(&article_id).is_some_and(|lane| Arc::strong_count(lane) == 1) {
            lanes.remove(&article_id);
        }
    }

    fn apply_reply_status(&self, reflection_id: Uuid, kind: MessageType) {
        let status = match kind {
            MessageType::ReflectionResponse => ReflectionStatus::Completed,
            MessageType::ReflectionError => ReflectionStatus::Failed,
            _ => return,
        };

        match self.tracker.settle(reflection_id, status) {
            Ok(_) => {}
            Err(TrackerError::NotFound(id)) => {
                debug!("Reply for untracked reflection {}", id);
            }
            Err(e) => {
                // e.g. the error echo of a skipped request; skipped stays terminal
                debug!("Ignoring reply status update: {}", e);
            }
        }
    }

    async fn forward(&self, message: &Message) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error serializing {} message: {}", message.kind, e);
                return;
            }
        };

        let mut channels = vec![article_channel(&message.article_id)];
        if let Some(reflection_id) = &message.reflection_id {
            channels.push(reflection_channel(reflection_id));
        }

        for channel in channels {
            let envelope = Envelope {
                channel,
                payload: payload.clone(),
            };
            if let Err(e) = self.outbound.enqueue(envelope).await {
                warn!("Error publishing to transport: {}", e);
            }
        }
    }
}
