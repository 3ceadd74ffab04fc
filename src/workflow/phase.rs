//! Article run phases

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow phase of one article run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Record created, workflow not started
    #[default]
    Pending,
    /// Agents are writing memos
    Drafting,
    /// Peer reflections requested and outstanding
    Reflecting,
    /// Aggregating reflections into the bias assessment
    Synthesizing,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Drafting => "drafting",
            Phase::Reflecting => "reflecting",
            Phase::Synthesizing => "synthesizing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Phase::Pending),
            "drafting" => Some(Phase::Drafting),
            "reflecting" => Some(Phase::Reflecting),
            "synthesizing" => Some(Phase::Synthesizing),
            "completed" => Some(Phase::Completed),
            "failed" => Some(Phase::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Forward-only, one step at a time; FAILED from any live phase
    pub fn can_transition_to(&self, next: Phase) -> bool {
        match (self, next) {
            (from, Phase::Failed) => !from.is_terminal(),
            (Phase::Pending, Phase::Drafting)
            | (Phase::Drafting, Phase::Reflecting)
            | (Phase::Reflecting, Phase::Synthesizing)
            | (Phase::Synthesizing, Phase::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
