//! Protocol Types
//!
//! Data contracts shared by the bus, the tracker and every agent.
//! Wire shape follows the `article:{id}` / `reflection:{id}` channel payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Key/value payload carried by messages
pub type Payload = Map<String, Value>;

/// Default prompt used when a reflection is requested without one
pub const DEFAULT_REFLECTION_PROMPT: &str = "Please provide your perspective on this memo.";

/// Kind of fact published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Started,
    Progress,
    Completed,
    Error,
    ReflectionRequest,
    ReflectionResponse,
    ReflectionCompleted,
    ReflectionError,
    ReflectionSummary,
    EditorFeedback,
    AgentProgress,
    AgentCompleted,
    AgentError,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::ReflectionRequest => "reflection_request",
            Self::ReflectionResponse => "reflection_response",
            Self::ReflectionCompleted => "reflection_completed",
            Self::ReflectionError => "reflection_error",
            Self::ReflectionSummary => "reflection_summary",
            Self::EditorFeedback => "editor_feedback",
            Self::AgentProgress => "agent_progress",
            Self::AgentCompleted => "agent_completed",
            Self::AgentError => "agent_error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a reflection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ReflectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Legal edges: PENDING→IN_PROGRESS→{COMPLETED|FAILED}, PENDING→SKIPPED
    pub fn can_transition_to(&self, next: ReflectionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Skipped)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for ReflectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority; serialized as its integer level (1-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ReflectionPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for ReflectionPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<ReflectionPriority> for u8 {
    fn from(p: ReflectionPriority) -> u8 {
        p as u8
    }
}

impl TryFrom<u8> for ReflectionPriority {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            4 => Ok(Self::Critical),
            other => Err(format!("invalid reflection priority: {}", other)),
        }
    }
}

/// Current time as float seconds since the epoch
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One fact published on the bus. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub agent_id: String,
    pub article_id: Uuid,
    pub content: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Payload,
}

impl Message {
    pub fn new(kind: MessageType, agent_id: &str, article_id: Uuid, content: Payload) -> Self {
        Self {
            kind,
            agent_id: agent_id.to_string(),
            article_id,
            content,
            reflection_id: None,
            target_agent_id: None,
            timestamp: now_seconds(),
            metadata: Payload::new(),
        }
    }

    pub fn with_reflection(mut self, reflection_id: Uuid) -> Self {
        self.reflection_id = Some(reflection_id);
        self
    }

    pub fn with_target(mut self, target_agent_id: &str) -> Self {
        self.target_agent_id = Some(target_agent_id.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    /// String field from `content`, if present
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// `content.memo_id` parsed as a UUID
    pub fn memo_id(&self) -> Option<Uuid> {
        self.content_str("memo_id").and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Whether this message is addressed to `agent`
    pub fn is_targeted_at(&self, agent: &str) -> bool {
        self.target_agent_id.as_deref() == Some(agent)
    }
}

/// A peer-critique request. Owned by the tracker once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRequest {
    pub id: Uuid,
    pub article_id: Uuid,
    pub memo_id: Uuid,
    pub source_agent_id: String,
    pub target_agent_id: String,
    pub content: String,
    pub prompt: Option<String>,
    pub priority: ReflectionPriority,
    /// Epoch seconds
    pub deadline: Option<f64>,
    pub status: ReflectionStatus,
    #[serde(default)]
    pub metadata: Payload,
}

impl ReflectionRequest {
    pub fn new(
        article_id: Uuid,
        memo_id: Uuid,
        source_agent_id: &str,
        target_agent_id: &str,
        content: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            article_id,
            memo_id,
            source_agent_id: source_agent_id.to_string(),
            target_agent_id: target_agent_id.to_string(),
            content: content.to_string(),
            prompt: None,
            priority: ReflectionPriority::Medium,
            deadline: None,
            status: ReflectionStatus::Pending,
            metadata: Payload::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_priority(mut self, priority: ReflectionPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<f64>) -> Self {
        self.deadline = deadline;
        self
    }
}
