//! Phase Controller
//!
//! Owns the workflow state machine of exactly one article:
//!
//! ```text
//! PENDING → DRAFTING → REFLECTING → SYNTHESIZING → COMPLETED
//!               └──────────┴────────────┴──────────→ FAILED
//! ```
//!
//! - DRAFTING ends once every required agent reported AGENT_COMPLETED
//! - REFLECTING ends when the completion signal resolves: all planned
//!   reflections reported back, or the soft wait expired (degraded)
//! - The whole drive runs under one hard deadline; expiry marks the run
//!   FAILED and releases every subscription of the article
//!
//! The controller is the single writer of its article run and saves it
//! after every mutation.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::phase::Phase;
use super::signal::{CompletionSignal, ReflectionOutcome};
use crate::agent::{
    review_priority, reviewer_prompt, AgentCapabilities, MemoRef, ReviewerPlanner, REQUIRED_DRAFTERS,
};
use crate::bias::{BiasScorer, KeywordBiasScorer};
use crate::pubsub::types::now_seconds;
use crate::pubsub::{Callback, Message, MessageBus, MessageType, Payload};
use crate::store::{ArticleRun, ArticleStore, ReflectionFailure, ReflectionNote, RunError, StoreError};

const CONTROLLER_SUBSCRIBER: &str = "controller";

/// Workflow failures
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Illegal phase transition: {from} -> {to}")]
    Transition { from: Phase, to: Phase },

    #[error("Article generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Article subscription was dropped")]
    InboxClosed,

    #[error("No {0} agent configured")]
    MissingAgent(String),
}

/// Controller timing and completion settings
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Soft-wait poll interval
    pub poll_interval: Duration,
    /// Soft-wait cap for the reflection phase
    pub reflection_wait: Duration,
    /// Hard end-to-end deadline
    pub generation_timeout: Duration,
    /// Agents whose completion starts the reflection phase
    pub required_agents: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            reflection_wait: Duration::from_secs(300),
            generation_timeout: Duration::from_secs(300),
            required_agents: REQUIRED_DRAFTERS
                .iter()
                .map(|role| role.agent_name().to_string())
                .collect(),
        }
    }
}

/// State machine for one article
pub struct PhaseController {
    article_id: Uuid,
    bus: Arc<MessageBus>,
    store: Arc<dyn ArticleStore>,
    editor: Arc<dyn AgentCapabilities>,
    scorer: Arc<dyn BiasScorer>,
    planner: ReviewerPlanner,
    config: WorkflowConfig,
    signal: Arc<CompletionSignal>,
    inbox: mpsc::UnboundedReceiver<Message>,
    run: ArticleRun,
    completed_agents: HashSet<String>,
    /// Planned reflections not yet reported back
    pending: HashSet<Uuid>,
    /// Every reflection id issued for this article
    issued: Vec<Uuid>,
    reflecting_since: Option<Instant>,
}

impl PhaseController {
    /// Subscribe to the article right away so no early message is missed.
    ///
    /// Requests and status events are published through `editor`.
    pub fn new(
        article_id: Uuid,
        bus: Arc<MessageBus>,
        store: Arc<dyn ArticleStore>,
        editor: Arc<dyn AgentCapabilities>,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let callback: Callback = Arc::new(move |msg: &Message| -> anyhow::Result<()> {
            tx.send(msg.clone())
                .map_err(|_| anyhow::anyhow!("controller inbox closed"))
        });
        bus.subscribe(article_id, callback, Some(CONTROLLER_SUBSCRIBER));

        Self {
            article_id,
            bus,
            store,
            editor,
            scorer: Arc::new(KeywordBiasScorer),
            planner: ReviewerPlanner::default(),
            config: WorkflowConfig::default(),
            signal: Arc::new(CompletionSignal::new()),
            inbox,
            run: ArticleRun::new(article_id),
            completed_agents: HashSet::new(),
            pending: HashSet::new(),
            issued: Vec::new(),
            reflecting_since: None,
        }
    }

    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn BiasScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_planner(mut self, planner: ReviewerPlanner) -> Self {
        self.planner = planner;
        self
    }

    /// Resolved once the reflection phase is over
    pub fn completion(&self) -> Arc<CompletionSignal> {
        Arc::clone(&self.signal)
    }

    /// Drive the article to COMPLETED or FAILED and release its subscriptions.
    ///
    /// Failures, including the hard timeout, are recorded on the returned
    /// run. `Err` means the failure itself could not be persisted.
    pub async fn run(mut self) -> Result<ArticleRun, WorkflowError> {
        let deadline = self.config.generation_timeout;
        info!("Article {} workflow started (deadline: {:?})", self.article_id, deadline);

        let result = match tokio::time::timeout(deadline, self.drive()).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::Timeout(deadline)),
        };

        let recorded = match result {
            Ok(()) => Ok(()),
            Err(e) => self.fail(&e).await,
        };

        self.cleanup();
        recorded.map(|()| self.run)
    }

    // ============ Drive loop ============

    async fn drive(&mut self) -> Result<(), WorkflowError> {
        self.run = self.store.get_article_run(self.article_id).await?;
        if self.run.status.is_terminal() {
            warn!("Article {} is already {}", self.article_id, self.run.status);
            return Ok(());
        }
        if self.run.status != Phase::Drafting {
            self.advance(Phase::Drafting).await?;
        }

        let mut started = Payload::new();
        started.insert("article_id".into(), json!(self.article_id.to_string()));
        self.editor.publish(MessageType::Started, started).await;

        let mut poll = tokio::time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        let outcome = loop {
            if self.run.status == Phase::Reflecting {
                if let Some(outcome) = self.signal.outcome() {
                    break outcome;
                }
            }

            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => self.on_message(message).await?,
                    None => return Err(WorkflowError::InboxClosed),
                },
                _ = poll.tick() => self.on_poll().await,
            }
        };

        self.synthesize(outcome).await
    }

    async fn on_message(&mut self, message: Message) -> Result<(), WorkflowError> {
        match message.kind {
            MessageType::AgentCompleted => self.on_agent_completed(message).await,
            MessageType::AgentError => {
                let error = message.content_str("error").unwrap_or("Unknown error").to_string();
                warn!("Agent {} reported an error: {}", message.agent_id, error);
                self.run.errors.push(RunError {
                    agent_id: message.agent_id,
                    error,
                    timestamp: message.timestamp,
                });
                self.save().await
            }
            MessageType::ReflectionResponse | MessageType::ReflectionCompleted => {
                self.on_reflection_reply(message, true).await
            }
            MessageType::ReflectionError => self.on_reflection_reply(message, false).await,
            MessageType::ReflectionSummary => {
                let (Some(memo_id), Some(summary)) = (message.memo_id(), message.content_str("summary")) else {
                    debug!("Reflection summary from {} without memo or text", message.agent_id);
                    return Ok(());
                };
                self.run.reflection_summaries.insert(memo_id, summary.to_string());
                self.save().await
            }
            MessageType::Started
            | MessageType::Progress
            | MessageType::Completed
            | MessageType::Error
            | MessageType::ReflectionRequest
            | MessageType::EditorFeedback
            | MessageType::AgentProgress => Ok(()),
        }
    }

    async fn on_agent_completed(&mut self, message: Message) -> Result<(), WorkflowError> {
        info!("Agent {} completed for article {}", message.agent_id, self.article_id);
        self.completed_agents.insert(message.agent_id.clone());
        self.run.agent_outputs.insert(message.agent_id, message.content);
        self.save().await?;

        let drafted = self
            .config
            .required_agents
            .iter()
            .all(|agent| self.completed_agents.contains(agent));
        if self.run.status == Phase::Drafting && drafted {
            self.start_reflection().await?;
        }
        Ok(())
    }

    async fn start_reflection(&mut self) -> Result<(), WorkflowError> {
        self.advance(Phase::Reflecting).await?;
        self.reflecting_since = Some(Instant::now());

        let memos = self.store.get_memos_by_article(self.article_id).await?;
        let refs: Vec<MemoRef> = memos
            .iter()
            .map(|memo| MemoRef {
                id: memo.id,
                source_agent_id: memo.agent_id.clone(),
            })
            .collect();
        let plan = self.planner.plan(&refs);
        info!(
            "Reflection plan for article {}: {} memos, {} reviews",
            self.article_id,
            plan.len(),
            plan.total_reviews()
        );

        for assignment in plan.iter() {
            let Some(memo) = self.store.get_memo_by_id(assignment.memo_id).await? else {
                warn!("Memo {} disappeared before review", assignment.memo_id);
                continue;
            };

            for reviewer in &assignment.reviewers {
                let id = self
                    .editor
                    .request_reflection(
                        memo.id,
                        &memo.content,
                        reviewer,
                        Some(reviewer_prompt(reviewer, &memo.agent_id)),
                        review_priority(reviewer, &memo.agent_id),
                        None,
                    )
                    .await;
                self.pending.insert(id);
                self.issued.push(id);
            }
        }

        if self.issued.is_empty() {
            warn!(
                "No reflections requested for article {}, waiting out the reflection window",
                self.article_id
            );
        }
        Ok(())
    }

    async fn on_reflection_reply(&mut self, message: Message, completed: bool) -> Result<(), WorkflowError> {
        let Some(reflection_id) = message.reflection_id else {
            return Ok(());
        };
        if !self.pending.remove(&reflection_id) {
            debug!("Reply for unplanned reflection {}", reflection_id);
            return Ok(());
        }

        let memo_id = message
            .memo_id()
            .or_else(|| self.bus.tracker().get(reflection_id).map(|r| r.memo_id));

        match memo_id {
            Some(memo_id) if completed => {
                let content = message
                    .content_str("reflection")
                    .or_else(|| message.content_str("content"))
                    .unwrap_or_default()
                    .to_string();
                self.run.reflections.entry(memo_id).or_default().push(ReflectionNote {
                    reflection_id,
                    source_agent_id: message.agent_id.clone(),
                    content,
                    metadata: message.metadata.clone(),
                    timestamp: message.timestamp,
                });
            }
            Some(memo_id) => {
                let error = message.content_str("error").unwrap_or("Unknown error").to_string();
                warn!("Reflection {} from {} failed: {}", reflection_id, message.agent_id, error);
                self.run.reflection_failures.entry(memo_id).or_default().push(ReflectionFailure {
                    reflection_id,
                    source_agent_id: message.agent_id.clone(),
                    error,
                    reason: message.content_str("reason").map(str::to_string),
                    timestamp: message.timestamp,
                });
            }
            None => warn!("Reflection {} has no memo, not recorded", reflection_id),
        }
        self.save().await?;

        debug!(
            "Reflection {} reported ({}/{} outstanding)",
            reflection_id,
            self.pending.len(),
            self.issued.len()
        );
        if self.pending.is_empty() && !self.issued.is_empty() && self.signal.resolve(ReflectionOutcome::Complete) {
            info!("All {} reflections reported for article {}", self.issued.len(), self.article_id);
        }
        Ok(())
    }

    async fn on_poll(&mut self) {
        if self.run.status != Phase::Reflecting {
            return;
        }

        let stats = self.bus.reflection_stats(self.article_id).await;
        debug!(
            "Article {} reflections: {} pending, {} in progress, {} completed, {} failed, {} skipped",
            self.article_id, stats.pending, stats.in_progress, stats.completed, stats.failed, stats.skipped
        );

        let Some(since) = self.reflecting_since else {
            return;
        };
        if since.elapsed() >= self.config.reflection_wait {
            let outstanding = self.pending.len();
            if self.signal.resolve(ReflectionOutcome::Degraded { outstanding }) {
                warn!(
                    "Reflection phase timed out after {:?} for article {}, proceeding with {} outstanding",
                    self.config.reflection_wait, self.article_id, outstanding
                );
            }
        }
    }

    async fn synthesize(&mut self, outcome: ReflectionOutcome) -> Result<(), WorkflowError> {
        self.run.reflection_outcome = Some(outcome);
        self.advance(Phase::Synthesizing).await?;

        let assessment = self.scorer.score(&self.run.reflections);
        info!(
            "Article {} bias: {} (level: {}, direction: {:.2})",
            self.article_id, assessment.summary, assessment.level, assessment.direction
        );
        self.run.bias_assessment = Some(assessment);
        self.advance(Phase::Completed).await?;

        let mut content = Payload::new();
        content.insert("article_id".into(), json!(self.article_id.to_string()));
        content.insert("reflections".into(), json!(self.run.reflection_count()));
        content.insert("degraded".into(), json!(outcome.is_degraded()));
        self.editor.publish(MessageType::Completed, content).await;
        Ok(())
    }

    // ============ Run record ============

    async fn save(&mut self) -> Result<(), WorkflowError> {
        self.run.touch();
        self.store.save_article_run(&self.run).await?;
        Ok(())
    }

    async fn advance(&mut self, next: Phase) -> Result<(), WorkflowError> {
        let from = self.run.status;
        if !from.can_transition_to(next) {
            return Err(WorkflowError::Transition { from, to: next });
        }

        self.run.status = next;
        self.save().await?;
        info!("Article {} phase: {} -> {}", self.article_id, from, next);

        let mut content = Payload::new();
        content.insert("phase".into(), json!(next.as_str()));
        content.insert("previous".into(), json!(from.as_str()));
        self.editor.publish(MessageType::Progress, content).await;
        Ok(())
    }

    async fn fail(&mut self, cause: &WorkflowError) -> Result<(), WorkflowError> {
        error!("Article {} failed: {}", self.article_id, cause);

        if !self.run.status.is_terminal() {
            self.run.status = Phase::Failed;
        }
        self.run.error_message = Some(cause.to_string());
        self.save().await?;

        let mut content = Payload::new();
        content.insert("error".into(), json!(cause.to_string()));
        content.insert("failed_at".into(), json!(now_seconds()));
        self.editor.publish(MessageType::Error, content).await;
        Ok(())
    }

    fn cleanup(&self) {
        self.bus.unsubscribe(self.article_id, None);
        for id in &self.issued {
            self.bus.unsubscribe_reflection(*id, None);
        }
        debug!(
            "Released subscriptions for article {} ({} reflections)",
            self.article_id,
            self.issued.len()
        );
    }
}
