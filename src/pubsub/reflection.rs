//! Reflection Protocol Operations
//!
//! Request/response exchange between two agents about a memo, layered on
//! the bus and its tracker. Unknown or already-settled ids are logged and
//! ignored; none of these operations return an error.

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::bus::MessageBus;
use super::tracker::ReflectionStats;
use super::types::{
    Message, MessageType, Payload, ReflectionRequest, ReflectionStatus, DEFAULT_REFLECTION_PROMPT,
};

impl MessageBus {
    /// Register a request and announce it to the target agent.
    ///
    /// The request is registered as PENDING under a fresh id, which is
    /// returned; whatever id the caller's value carried is replaced.
    pub async fn request_reflection(&self, request: ReflectionRequest) -> Uuid {
        self.request_reflection_with(request, |_| {}).await
    }

    /// Like [`request_reflection`](Self::request_reflection), but hands the
    /// assigned id to `registered` before the request is published, so a
    /// requester can track it before any reply can arrive.
    pub async fn request_reflection_with<F>(&self, mut request: ReflectionRequest, registered: F) -> Uuid
    where
        F: FnOnce(Uuid),
    {
        request.id = Uuid::new_v4();
        request.status = ReflectionStatus::Pending;
        let id = request.id;

        let mut content = Payload::new();
        content.insert("memo_id".into(), json!(request.memo_id.to_string()));
        content.insert("content".into(), json!(request.content));
        content.insert(
            "prompt".into(),
            json!(request.prompt.as_deref().unwrap_or(DEFAULT_REFLECTION_PROMPT)),
        );

        let mut metadata = Payload::new();
        metadata.insert("priority".into(), json!(u8::from(request.priority)));
        metadata.insert(
            "deadline".into(),
            request.deadline.map_or(Value::Null, |d| json!(d)),
        );

        let message = Message::new(
            MessageType::ReflectionRequest,
            &request.source_agent_id,
            request.article_id,
            content,
        )
        .with_reflection(id)
        .with_target(&request.target_agent_id)
        .with_metadata(metadata);

        debug!(
            "Reflection {} requested: {} -> {} (priority: {:?})",
            id, request.source_agent_id, request.target_agent_id, request.priority
        );

        if let Err(e) = self.tracker().add(request) {
            error!("Cannot register reflection: {}", e);
            return id;
        }
        registered(id);
        self.publish(message).await;
        id
    }

    /// Complete a request and route the reflection back to its requester.
    ///
    /// Returns `false` (after logging) when the id is unknown or the request
    /// is already terminal.
    pub async fn submit_reflection(
        &self,
        reflection_id: Uuid,
        agent_id: &str,
        content: &str,
        metadata: Payload,
    ) -> bool {
        let Some(request) = self.tracker().get(reflection_id) else {
            error!("Reflection {} not found", reflection_id);
            return false;
        };
        if request.status.is_terminal() {
            warn!(
                "Reflection {} already {}, ignoring submission from {}",
                reflection_id, request.status, agent_id
            );
            return false;
        }

        if let Err(e) = self.tracker().settle(reflection_id, ReflectionStatus::Completed) {
            warn!("Could not complete reflection {}: {}", reflection_id, e);
            return false;
        }

        let mut body = Payload::new();
        body.insert("memo_id".into(), json!(request.memo_id.to_string()));
        body.insert("reflection".into(), json!(content));

        let message = Message::new(
            MessageType::ReflectionResponse,
            agent_id,
            request.article_id,
            body,
        )
        .with_reflection(reflection_id)
        .with_target(&request.source_agent_id)
        .with_metadata(metadata);

        self.publish(message).await;
        info!("Reflection {} submitted by {}", reflection_id, agent_id);
        true
    }

    /// Claim a request. Status change only, nothing is published.
    pub async fn mark_in_progress(&self, reflection_id: Uuid) -> bool {
        match self.tracker().update_status(reflection_id, ReflectionStatus::InProgress) {
            Ok(_) => true,
            Err(e) => {
                warn!("Cannot mark reflection in progress: {}", e);
                false
            }
        }
    }

    /// Skip a request and tell the requester why
    pub async fn mark_skipped(&self, reflection_id: Uuid, reason: &str) -> bool {
        let request = match self.tracker().update_status(reflection_id, ReflectionStatus::Skipped) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot skip reflection: {}", e);
                return false;
            }
        };

        let mut content = Payload::new();
        content.insert("memo_id".into(), json!(request.memo_id.to_string()));
        content.insert("error".into(), json!("Reflection skipped"));
        content.insert("reason".into(), json!(reason));

        let message = Message::new(
            MessageType::ReflectionError,
            &request.target_agent_id,
            request.article_id,
            content,
        )
        .with_reflection(reflection_id)
        .with_target(&request.source_agent_id);

        self.publish(message).await;
        info!("Reflection {} skipped: {}", reflection_id, reason);
        true
    }

    /// Fail a request the target could not answer and tell the requester.
    ///
    /// The bus settles the request to FAILED when the error is published.
    pub async fn report_reflection_error(&self, reflection_id: Uuid, agent_id: &str, error: &str) -> bool {
        let Some(request) = self.tracker().get(reflection_id) else {
            error!("Reflection {} not found", reflection_id);
            return false;
        };
        if request.status.is_terminal() {
            warn!(
                "Reflection {} already {}, ignoring error from {}",
                reflection_id, request.status, agent_id
            );
            return false;
        }

        let mut content = Payload::new();
        content.insert("memo_id".into(), json!(request.memo_id.to_string()));
        content.insert("error".into(), json!(error));

        let message = Message::new(
            MessageType::ReflectionError,
            agent_id,
            request.article_id,
            content,
        )
        .with_reflection(reflection_id)
        .with_target(&request.source_agent_id);

        self.publish(message).await;
        warn!("Reflection {} failed in {}: {}", reflection_id, agent_id, error);
        true
    }

    /// Pending work for an agent, highest priority first
    pub async fn pending_for(&self, agent_id: &str) -> Vec<ReflectionRequest> {
        self.tracker().agent_queue(agent_id)
    }

    pub async fn reflection_stats(&self, article_id: Uuid) -> ReflectionStats {
        self.tracker().stats(article_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::bus::{BusConfig, Callback};
    use crate::pubsub::transport::LogTransport;
    use crate::pubsub::types::ReflectionPriority;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn bus() -> Arc<MessageBus> {
        MessageBus::start(Arc::new(LogTransport), BusConfig::default())
    }

    fn recorder(bus: &MessageBus, article_id: Uuid) -> Arc<Mutex<Vec<Message>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback = Arc::new(move |msg: &Message| -> anyhow::Result<()> {
            sink.lock().push(msg.clone());
            Ok(())
        });
        bus.subscribe(article_id, callback, None);
        seen
    }

    #[tokio::test]
    async fn test_request_reflection_publishes_request() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let memo_id = Uuid::new_v4();
        let seen = recorder(&bus, article_id);

        let request = ReflectionRequest::new(article_id, memo_id, "Chief Editor", "Politics-Right", "memo")
            .with_priority(ReflectionPriority::High);
        let id = bus.request_reflection(request).await;

        let stored = bus.tracker().get(id).unwrap();
        assert_eq!(stored.status, ReflectionStatus::Pending);
        assert_eq!(stored.priority, ReflectionPriority::High);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let msg = &seen[0];
        assert_eq!(msg.kind, MessageType::ReflectionRequest);
        assert_eq!(msg.agent_id, "Chief Editor");
        assert_eq!(msg.target_agent_id.as_deref(), Some("Politics-Right"));
        assert_eq!(msg.reflection_id, Some(id));
        assert_eq!(msg.memo_id(), Some(memo_id));
        assert_eq!(msg.content_str("prompt"), Some(DEFAULT_REFLECTION_PROMPT));
        assert_eq!(msg.metadata["priority"], json!(3));
        assert_eq!(msg.metadata["deadline"], Value::Null);
    }

    #[tokio::test]
    async fn test_submit_reflection_routes_to_requester() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let request = ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Historian", "memo");
        let id = bus.request_reflection(request).await;
        let seen = recorder(&bus, article_id);

        let mut metadata = Payload::new();
        metadata.insert("bias_score".into(), json!(0.3));
        assert!(bus.submit_reflection(id, "Historian", "Solid context.", metadata).await);

        assert_eq!(bus.tracker().get(id).unwrap().status, ReflectionStatus::Completed);
        let seen = seen.lock();
        let msg = &seen[0];
        assert_eq!(msg.kind, MessageType::ReflectionResponse);
        assert_eq!(msg.agent_id, "Historian");
        assert_eq!(msg.target_agent_id.as_deref(), Some("Chief Editor"));
        assert_eq!(msg.content_str("reflection"), Some("Solid context."));
        assert_eq!(msg.metadata["bias_score"], json!(0.3));
    }

    #[tokio::test]
    async fn test_submit_unknown_reflection_is_noop() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let seen = recorder(&bus, article_id);

        assert!(!bus.submit_reflection(Uuid::new_v4(), "Writer", "text", Payload::new()).await);
        assert!(bus.tracker().is_empty());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_ignored() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let request = ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Writer", "memo");
        let id = bus.request_reflection(request).await;
        let seen = recorder(&bus, article_id);

        assert!(bus.submit_reflection(id, "Writer", "first", Payload::new()).await);
        assert!(!bus.submit_reflection(id, "Writer", "second", Payload::new()).await);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_request_gets_fresh_id() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let request = ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Writer", "memo");

        let first = bus.request_reflection(request.clone()).await;
        assert_ne!(first, request.id);
        assert!(bus.submit_reflection(first, "Writer", "done", Payload::new()).await);

        let second = bus.request_reflection(request).await;
        assert_ne!(second, first);
        assert_eq!(bus.tracker().get(first).unwrap().status, ReflectionStatus::Completed);
        assert_eq!(bus.tracker().get(second).unwrap().status, ReflectionStatus::Pending);

        let queue = bus.pending_for("Writer").await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, second);
    }

    #[tokio::test]
    async fn test_registered_hook_sees_id_before_publish() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let seen = recorder(&bus, article_id);
        let request = ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Writer", "memo");

        let mut published_before = None;
        let id = bus
            .request_reflection_with(request, |id| {
                published_before = Some((id, seen.lock().len()));
            })
            .await;

        assert_eq!(published_before, Some((id, 0)));
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_skipped_notifies_requester_and_stays_skipped() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let request = ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Graphic Artist", "memo");
        let id = bus.request_reflection(request).await;
        let seen = recorder(&bus, article_id);

        assert!(bus.mark_skipped(id, "not a reviewer").await);

        // The REFLECTION_ERROR echo must not move SKIPPED to FAILED
        assert_eq!(bus.tracker().get(id).unwrap().status, ReflectionStatus::Skipped);
        let seen = seen.lock();
        let msg = &seen[0];
        assert_eq!(msg.kind, MessageType::ReflectionError);
        assert_eq!(msg.agent_id, "Graphic Artist");
        assert_eq!(msg.target_agent_id.as_deref(), Some("Chief Editor"));
        assert_eq!(msg.content_str("error"), Some("Reflection skipped"));
        assert_eq!(msg.content_str("reason"), Some("not a reviewer"));
    }

    #[tokio::test]
    async fn test_reported_error_fails_request() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let id = bus
            .request_reflection(ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Historian", "memo"))
            .await;
        assert!(bus.mark_in_progress(id).await);
        let seen = recorder(&bus, article_id);

        assert!(bus.report_reflection_error(id, "Historian", "model unavailable").await);
        assert_eq!(bus.tracker().get(id).unwrap().status, ReflectionStatus::Failed);
        assert!(!bus.report_reflection_error(id, "Historian", "again").await);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, MessageType::ReflectionError);
        assert_eq!(seen[0].content_str("error"), Some("model unavailable"));
    }

    #[tokio::test]
    async fn test_in_progress_then_pending_queue() {
        let bus = bus();
        let article_id = Uuid::new_v4();
        let first = bus
            .request_reflection(ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Writer", "a"))
            .await;
        let second = bus
            .request_reflection(ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", "Writer", "b"))
            .await;

        assert!(bus.mark_in_progress(first).await);
        assert!(!bus.mark_in_progress(Uuid::new_v4()).await);

        let pending = bus.pending_for("Writer").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second);

        let stats = bus.reflection_stats(article_id).await;
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_reply_fanout_reaches_reflection_subscribers_only() {
        let bus = bus();
        let article_a = Uuid::new_v4();
        let article_b = Uuid::new_v4();
        let id = bus
            .request_reflection(ReflectionRequest::new(article_a, Uuid::new_v4(), "Chief Editor", "Writer", "memo"))
            .await;

        let on_a = recorder(&bus, article_a);
        let on_b = recorder(&bus, article_b);
        let on_reflection = Arc::new(Mutex::new(Vec::new()));
        let on_other_reflection = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&on_reflection);
        let cb: Callback = Arc::new(move |msg: &Message| -> anyhow::Result<()> {
            sink.lock().push(msg.kind);
            Ok(())
        });
        bus.subscribe_reflection(id, cb, None);

        let sink = Arc::clone(&on_other_reflection);
        let cb: Callback = Arc::new(move |msg: &Message| -> anyhow::Result<()> {
            sink.lock().push(msg.kind);
            Ok(())
        });
        bus.subscribe_reflection(Uuid::new_v4(), cb, None);

        bus.submit_reflection(id, "Writer", "ok", Payload::new()).await;

        assert_eq!(on_a.lock().len(), 1);
        assert!(on_b.lock().is_empty());
        assert_eq!(*on_reflection.lock(), vec![MessageType::ReflectionResponse]);
        assert!(on_other_reflection.lock().is_empty());
    }
}
