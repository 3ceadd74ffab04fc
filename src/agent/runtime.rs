//! Agent Runtime
//!
//! One live agent per (persona, article). An agent subscribes to its
//! article, answers reflection requests addressed to it and keeps its own
//! bookkeeping of requests it has sent out.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::persona::AgentRole;
use crate::pubsub::{
    Callback, Message, MessageBus, MessageType, Payload, ReflectionPriority, ReflectionRequest,
};

/// Per-agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub role: AgentRole,
    pub name: String,
    pub can_reflect: bool,
    /// 0.0 to 1.0, reported with every reflection
    pub reflection_quality: f32,
}

impl AgentConfig {
    pub fn for_role(role: AgentRole) -> Self {
        Self {
            role,
            name: role.agent_name().to_string(),
            can_reflect: role.reviews_by_default(),
            reflection_quality: 0.8,
        }
    }
}

/// A reflection received for one of this agent's requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionFeedback {
    pub reflection_id: Uuid,
    pub memo_id: Option<Uuid>,
    /// The reviewer
    pub source_agent_id: String,
    pub content: String,
    pub metadata: Payload,
    pub timestamp: f64,
}

/// Requester-side bookkeeping, separate from the bus tracker
#[derive(Debug, Default)]
pub struct AgentState {
    pub outstanding: HashSet<Uuid>,
    pub feedback: HashMap<Uuid, ReflectionFeedback>,
    pub failed: HashMap<Uuid, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReflectionTally {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Reviewer output
#[derive(Debug, Clone, Default)]
pub struct Reflection {
    pub content: String,
    pub metadata: Payload,
}

/// Produces the text of a reflection
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(
        &self,
        reviewer: &AgentConfig,
        request: &ReflectionRequest,
    ) -> anyhow::Result<Reflection>;
}

/// Rule-based reflector built from the persona's review focus
#[derive(Debug, Clone, Copy, Default)]
pub struct FocusReflector;

#[async_trait]
impl Reflector for FocusReflector {
    async fn reflect(
        &self,
        reviewer: &AgentConfig,
        request: &ReflectionRequest,
    ) -> anyhow::Result<Reflection> {
        let words = request.content.split_whitespace().count();
        let content = format!(
            "{} reviewed the memo from {} ({} words), checking {}.",
            reviewer.name,
            request.source_agent_id,
            words,
            reviewer.role.review_focus()
        );

        let mut metadata = Payload::new();
        metadata.insert("quality".into(), json!(reviewer.reflection_quality));
        metadata.insert("focus".into(), json!(reviewer.role.as_str()));

        Ok(Reflection { content, metadata })
    }
}

/// The surface an agent exposes to workflow code
#[async_trait]
pub trait AgentCapabilities: Send + Sync {
    fn name(&self) -> &str;

    fn article_id(&self) -> Uuid;

    /// Publish a message of `kind` from this agent on its article
    async fn publish(&self, kind: MessageType, content: Payload);

    /// Subscribe an extra callback to this agent's article
    fn subscribe(&self, callback: Callback) -> String;

    async fn request_reflection(
        &self,
        memo_id: Uuid,
        content: &str,
        target_agent_id: &str,
        prompt: Option<String>,
        priority: ReflectionPriority,
        deadline: Option<f64>,
    ) -> Uuid;

    async fn submit_reflection(&self, reflection_id: Uuid, content: &str, metadata: Payload) -> bool;
}

/// A live persona bound to one article
pub struct Agent {
    config: AgentConfig,
    article_id: Uuid,
    bus: Arc<MessageBus>,
    reflector: Arc<dyn Reflector>,
    state: Mutex<AgentState>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        article_id: Uuid,
        bus: Arc<MessageBus>,
        reflector: Arc<dyn Reflector>,
    ) -> Self {
        Self {
            config,
            article_id,
            bus,
            reflector,
            state: Mutex::new(AgentState::default()),
        }
    }

    /// Persona defaults with the rule-based reflector
    pub fn for_role(role: AgentRole, article_id: Uuid, bus: Arc<MessageBus>) -> Self {
        Self::new(AgentConfig::for_role(role), article_id, bus, Arc::new(FocusReflector))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn subscriber_id(&self) -> String {
        format!("agent:{}", self.config.name)
    }

    /// Subscribe to the article and start the message loop.
    ///
    /// The loop ends once the agent is unsubscribed (see [`Agent::stop`]) or
    /// the article's subscribers are dropped.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let callback: Callback = Arc::new(move |msg: &Message| -> anyhow::Result<()> {
            tx.send(msg.clone())
                .map_err(|_| anyhow::anyhow!("agent loop has stopped"))
        });
        self.bus
            .subscribe(self.article_id, callback, Some(&self.subscriber_id()));

        let agent = Arc::clone(self);
        info!("Agent {} started for article {}", agent.config.name, agent.article_id);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                agent.handle(message).await;
            }
            debug!("Agent {} stopped for article {}", agent.config.name, agent.article_id);
        })
    }

    pub fn stop(&self) {
        self.bus
            .unsubscribe(self.article_id, Some(&self.subscriber_id()));
    }

    async fn handle(&self, message: Message) {
        let for_me = message.is_targeted_at(&self.config.name);

        match message.kind {
            MessageType::ReflectionRequest if for_me => self.work_reflection_queue().await,
            MessageType::ReflectionResponse if for_me => self.on_reflection_response(&message),
            MessageType::ReflectionError if for_me => self.on_reflection_error(&message),
            MessageType::ReflectionRequest
            | MessageType::ReflectionResponse
            | MessageType::ReflectionError => {}
            MessageType::Started
            | MessageType::Progress
            | MessageType::Completed
            | MessageType::Error
            | MessageType::ReflectionCompleted
            | MessageType::ReflectionSummary
            | MessageType::EditorFeedback
            | MessageType::AgentProgress
            | MessageType::AgentCompleted
            | MessageType::AgentError => {
                if message.agent_id != self.config.name {
                    debug!(
                        "Agent {} received {} from {}",
                        self.config.name, message.kind, message.agent_id
                    );
                }
            }
        }
    }

    // ============ Reviewing ============

    /// Answer every pending request for this article, highest priority first
    async fn work_reflection_queue(&self) {
        let queue: Vec<ReflectionRequest> = self
            .bus
            .pending_for(&self.config.name)
            .await
            .into_iter()
            .filter(|r| r.article_id == self.article_id)
            .collect();

        for request in queue {
            if !self.config.can_reflect {
                let reason = format!(
                    "Agent {} is not configured to provide reflections",
                    self.config.name
                );
                self.skip_reflection(request.id, &reason).await;
                continue;
            }

            if !self.bus.mark_in_progress(request.id).await {
                continue;
            }

            match self.reflector.reflect(&self.config, &request).await {
                Ok(reflection) => {
                    self.submit_reflection(request.id, &reflection.content, reflection.metadata)
                        .await;
                }
                Err(e) => {
                    self.bus
                        .report_reflection_error(request.id, &self.config.name, &e.to_string())
                        .await;
                }
            }
        }
    }

    pub async fn skip_reflection(&self, reflection_id: Uuid, reason: &str) -> bool {
        let skipped = self.bus.mark_skipped(reflection_id, reason).await;
        if skipped {
            info!(
                "Agent {} skipped reflection {} ({})",
                self.config.name, reflection_id, reason
            );
        }
        skipped
    }

    /// Inbound work still waiting for this agent
    pub async fn pending_reflections(&self) -> Vec<ReflectionRequest> {
        self.bus.pending_for(&self.config.name).await
    }

    // ============ Requesting ============

    fn on_reflection_response(&self, message: &Message) {
        let Some(reflection_id) = message.reflection_id else {
            return;
        };
        let mut state = self.state.lock();
        if !state.outstanding.remove(&reflection_id) {
            return;
        }

        let feedback = ReflectionFeedback {
            reflection_id,
            memo_id: message.memo_id(),
            source_agent_id: message.agent_id.clone(),
            content: message.content_str("reflection").unwrap_or_default().to_string(),
            metadata: message.metadata.clone(),
            timestamp: message.timestamp,
        };
        state.feedback.insert(reflection_id, feedback);
        info!(
            "Agent {} received reflection from {} ({})",
            self.config.name, message.agent_id, reflection_id
        );
    }

    fn on_reflection_error(&self, message: &Message) {
        let Some(reflection_id) = message.reflection_id else {
            return;
        };
        let mut state = self.state.lock();
        if !state.outstanding.remove(&reflection_id) {
            return;
        }

        let error = message.content_str("error").unwrap_or("Unknown error").to_string();
        warn!(
            "Agent {} received reflection error from {}: {}",
            self.config.name, message.agent_id, error
        );
        state.failed.insert(reflection_id, error);
    }

    /// Same request to several reviewers; ids in target order
    pub async fn request_reflections_from(
        &self,
        memo_id: Uuid,
        content: &str,
        targets: &[&str],
        prompt: Option<String>,
        priority: ReflectionPriority,
        deadline: Option<f64>,
    ) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(targets.len());
        for target in targets {
            let id = self
                .request_reflection(memo_id, content, target, prompt.clone(), priority, deadline)
                .await;
            ids.push(id);
        }
        ids
    }

    pub fn has_pending_reflections(&self) -> bool {
        !self.state.lock().outstanding.is_empty()
    }

    pub fn reflection_status(&self) -> ReflectionTally {
        let state = self.state.lock();
        ReflectionTally {
            pending: state.outstanding.len(),
            completed: state.feedback.len(),
            failed: state.failed.len(),
        }
    }

    /// Feedback received, for one memo or all of them, oldest first
    pub fn feedback_for(&self, memo_id: Option<Uuid>) -> Vec<ReflectionFeedback> {
        let state = self.state.lock();
        let mut feedback: Vec<ReflectionFeedback> = state
            .feedback
            .values()
            .filter(|f| memo_id.is_none() || f.memo_id == memo_id)
            .cloned()
            .collect();
        feedback.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        feedback
    }

    // ============ Status ============

    pub async fn publish_progress(&self, content: Payload) {
        self.publish(MessageType::AgentProgress, content).await;
    }

    pub async fn publish_completion(&self, content: Payload) {
        self.publish(MessageType::AgentCompleted, content).await;
    }

    pub async fn publish_error(&self, error: &str, details: Option<Payload>) {
        let mut content = Payload::new();
        content.insert("error".into(), json!(error));
        if let Some(details) = details {
            content.extend(details);
        }
        self.publish(MessageType::AgentError, content).await;
    }
}

#[async_trait]
impl AgentCapabilities for Agent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn article_id(&self) -> Uuid {
        self.article_id
    }

    async fn publish(&self, kind: MessageType, content: Payload) {
        let message = Message::new(kind, &self.config.name, self.article_id, content);
        self.bus.publish(message).await;
    }

    fn subscribe(&self, callback: Callback) -> String {
        self.bus.subscribe(self.article_id, callback, None)
    }

    async fn request_reflection(
        &self,
        memo_id: Uuid,
        content: &str,
        target_agent_id: &str,
        prompt: Option<String>,
        priority: ReflectionPriority,
        deadline: Option<f64>,
    ) -> Uuid {
        let request = ReflectionRequest::new(
            self.article_id,
            memo_id,
            &self.config.name,
            target_agent_id,
            content,
        )
        .with_prompt(prompt)
        .with_priority(priority)
        .with_deadline(deadline);

        // Track before publishing: a local reviewer may answer inside publish
        let id = self
            .bus
            .request_reflection_with(request, |id| {
                self.state.lock().outstanding.insert(id);
            })
            .await;

        info!(
            "Agent {} requested reflection from {} ({})",
            self.config.name, target_agent_id, id
        );
        id
    }

    async fn submit_reflection(&self, reflection_id: Uuid, content: &str, metadata: Payload) -> bool {
        let submitted = self
            .bus
            .submit_reflection(reflection_id, &self.config.name, content, metadata)
            .await;
        if submitted {
            info!("Agent {} submitted reflection {}", self.config.name, reflection_id);
        }
        submitted
    }
}
