//! Article Store
//!
//! Persisted article runs and memos. The workflow reads and writes through
//! [`ArticleStore`]; two backends ship with the crate:
//! - `MemoryStore`: lock-protected maps, for tests and dry runs
//! - `SqliteStore`: one JSON body per run plus a memo table

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::bias::BiasAssessment;
use crate::pubsub::types::{now_seconds, Payload};
use crate::workflow::{Phase, ReflectionOutcome};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record {0}: {1}")]
    Corrupt(String, String),
}

/// A unit of agent-authored analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoRecord {
    pub id: Uuid,
    pub article_id: Uuid,
    pub agent_id: String,
    pub content: String,
    pub created_at: f64,
}

impl MemoRecord {
    pub fn new(article_id: Uuid, agent_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            article_id,
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            created_at: now_seconds(),
        }
    }
}

/// A completed reflection stored against its memo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionNote {
    pub reflection_id: Uuid,
    /// The reviewer
    pub source_agent_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Payload,
    pub timestamp: f64,
}

/// A reflection that failed or was skipped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionFailure {
    pub reflection_id: Uuid,
    pub source_agent_id: String,
    pub error: String,
    pub reason: Option<String>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub agent_id: String,
    pub error: String,
    pub timestamp: f64,
}

/// Persisted aggregate of one workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRun {
    pub id: Uuid,
    pub status: Phase,
    /// Completion payload per agent
    #[serde(default)]
    pub agent_outputs: BTreeMap<String, Payload>,
    /// memo id -> completed reflections
    #[serde(default)]
    pub reflections: BTreeMap<Uuid, Vec<ReflectionNote>>,
    /// memo id -> failed or skipped reflections
    #[serde(default)]
    pub reflection_failures: BTreeMap<Uuid, Vec<ReflectionFailure>>,
    /// memo id -> editor summary
    #[serde(default)]
    pub reflection_summaries: BTreeMap<Uuid, String>,
    pub reflection_outcome: Option<ReflectionOutcome>,
    pub bias_assessment: Option<BiasAssessment>,
    #[serde(default)]
    pub errors: Vec<RunError>,
    pub error_message: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
}

impl ArticleRun {
    pub fn new(id: Uuid) -> Self {
        let now = now_seconds();
        Self {
            id,
            status: Phase::Pending,
            agent_outputs: BTreeMap::new(),
            reflections: BTreeMap::new(),
            reflection_failures: BTreeMap::new(),
            reflection_summaries: BTreeMap::new(),
            reflection_outcome: None,
            bias_assessment: None,
            errors: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_seconds();
    }

    /// Completed reflections across all memos
    pub fn reflection_count(&self) -> usize {
        self.reflections.values().map(Vec::len).sum()
    }
}

/// Storage collaborator used by the workflow
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Load a run, creating and saving a fresh PENDING record if none exists
    async fn get_article_run(&self, id: Uuid) -> Result<ArticleRun, StoreError>;

    async fn save_article_run(&self, run: &ArticleRun) -> Result<(), StoreError>;

    /// Memos of an article, oldest first
    async fn get_memos_by_article(&self, article_id: Uuid) -> Result<Vec<MemoRecord>, StoreError>;

    async fn get_memo_by_id(&self, memo_id: Uuid) -> Result<Option<MemoRecord>, StoreError>;

    async fn save_memo(&self, memo: &MemoRecord) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_pending() {
        let run = ArticleRun::new(Uuid::new_v4());
        assert_eq!(run.status, Phase::Pending);
        assert_eq!(run.reflection_count(), 0);
        assert!(run.bias_assessment.is_none());
    }

    #[test]
    fn test_run_json_shape() {
        let mut run = ArticleRun::new(Uuid::nil());
        run.reflection_outcome = Some(ReflectionOutcome::Degraded { outstanding: 2 });
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["reflection_outcome"]["kind"], "degraded");
        assert_eq!(json["reflection_outcome"]["outstanding"], 2);

        let back: ArticleRun = serde_json::from_value(json).unwrap();
        assert_eq!(back, run);
    }
}
