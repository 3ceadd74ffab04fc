//! Newsroom Agents
//!
//! Composition instead of inheritance:
//! - Personas as a closed tagged variant (`AgentRole`)
//! - Reviewer assignment for the reflection phase
//! - A live agent runtime behind the `AgentCapabilities` interface
//!
//! Each agent owns a plain `AgentState` and reacts to bus traffic for its
//! article: Draft → Publish → Review peers → Collect feedback

pub mod persona;
pub mod planner;
pub mod runtime;

pub use persona::{AgentRole, REQUIRED_DRAFTERS, REVIEW_ROSTER};
pub use planner::{
    review_priority, reviewer_prompt, MemoAssignment, MemoRef, ReflectionPlan, ReviewerPlanner,
};
pub use runtime::{
    Agent, AgentCapabilities, AgentConfig, AgentState, FocusReflector, Reflection,
    ReflectionFeedback, ReflectionTally, Reflector,
};
