//! Foglio Coordinator
//!
//! Reflection coordination and pub/sub messaging for the Foglio article
//! workflow.
//!
//! # Features
//!
//! - **Message Bus**: article- and reflection-scoped fanout with per-article ordering
//! - **Reflection Protocol**: request / submit / skip with a priority-ordered tracker
//! - **Reviewer Planner**: deterministic reviewer assignment from a priority table
//! - **Phase Controller**: drafting → reflecting → synthesizing state machine
//! - **Bias Aggregation**: pluggable scorer over captured reflections
//! - **Transport**: bounded outbound queue to Redis pub/sub
//! - **Stores**: in-memory and SQLite article runs
//!
//! # Architecture
//!
//! ```text
//! Agents ──► MessageBus ──► Redis (article:{id}, reflection:{id})
//!   ▲            │
//!   │            ├── Subscribers (per article / per reflection)
//!   │            └── ReflectionTracker (status + per-agent queues)
//!   │
//! PhaseController ──► ReviewerPlanner
//!        │
//!        ├── ArticleStore (runs + memos)
//!        └── BiasScorer
//! ```

pub mod agent;
pub mod bias;
pub mod config;
pub mod newsroom;
pub mod pubsub;
pub mod store;
pub mod workflow;

pub use agent::{Agent, AgentCapabilities, AgentConfig, AgentRole, ReviewerPlanner};
pub use bias::{BiasAssessment, BiasLevel, BiasScorer, KeywordBiasScorer};
pub use config::Config;
pub use newsroom::Newsroom;
pub use pubsub::{
    BusConfig, Message, MessageBus, MessageType, ReflectionPriority, ReflectionRequest,
    ReflectionStatus, ReflectionTracker,
};
pub use store::{ArticleRun, ArticleStore, MemoRecord, MemoryStore, SqliteStore, StoreError};
pub use workflow::{Phase, PhaseController, ReflectionOutcome, WorkflowConfig, WorkflowError};
