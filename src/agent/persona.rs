//! Agent Personas
//!
//! The closed set of newsroom agents. Each variant carries its canonical
//! agent name, its reviewing focus and whether it reviews peers by default.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Newsroom persona / role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Editor,
    Researcher,
    Writer,
    Historian,
    PoliticsLeft,
    PoliticsRight,
    Geopolitics,
    GraphicArtist,
}

/// Agents eligible to review memos, in declared enumeration order.
/// Tie-breaking in reviewer planning follows this order.
pub const REVIEW_ROSTER: [AgentRole; 7] = [
    AgentRole::Researcher,
    AgentRole::Writer,
    AgentRole::Historian,
    AgentRole::PoliticsLeft,
    AgentRole::PoliticsRight,
    AgentRole::Geopolitics,
    AgentRole::Editor,
];

/// Agents that must report completion before reflection starts
pub const REQUIRED_DRAFTERS: [AgentRole; 6] = [
    AgentRole::Researcher,
    AgentRole::Writer,
    AgentRole::Historian,
    AgentRole::PoliticsLeft,
    AgentRole::PoliticsRight,
    AgentRole::Geopolitics,
];

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::Editor,
        AgentRole::Researcher,
        AgentRole::Writer,
        AgentRole::Historian,
        AgentRole::PoliticsLeft,
        AgentRole::PoliticsRight,
        AgentRole::Geopolitics,
        AgentRole::GraphicArtist,
    ];

    /// Canonical agent name used as `agent_id` on the bus
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Editor => "Chief Editor",
            Self::Researcher => "Researcher",
            Self::Writer => "Writer",
            Self::Historian => "Historian",
            Self::PoliticsLeft => "Politics-Left",
            Self::PoliticsRight => "Politics-Right",
            Self::Geopolitics => "Geopolitics",
            Self::GraphicArtist => "Graphic Artist",
        }
    }

    pub fn from_agent_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.agent_name() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::Researcher => "researcher",
            Self::Writer => "writer",
            Self::Historian => "historian",
            Self::PoliticsLeft => "politics_left",
            Self::PoliticsRight => "politics_right",
            Self::Geopolitics => "geopolitics",
            Self::GraphicArtist => "graphic_artist",
        }
    }

    /// What this persona looks for when reviewing a peer's memo
    pub fn review_focus(&self) -> &'static str {
        match self {
            Self::Editor => "structure, clarity and adherence to the style guide",
            Self::Researcher => "factual accuracy and the quality of cited sources",
            Self::Writer => "readability, narrative flow and headline fit",
            Self::Historian => "historical accuracy and missing precedent",
            Self::PoliticsLeft => "progressive perspectives and omitted social impacts",
            Self::PoliticsRight => "conservative perspectives and omitted economic trade-offs",
            Self::Geopolitics => "international implications and cross-border context",
            Self::GraphicArtist => "opportunities for charts and visual explanation",
        }
    }

    /// Visual-only personas do not review text
    pub fn reviews_by_default(&self) -> bool {
        !matches!(self, Self::GraphicArtist)
    }

    /// The politically opposing pairing, in either direction
    pub fn is_opposing(&self, other: AgentRole) -> bool {
        matches!(
            (self, other),
            (Self::PoliticsLeft, Self::PoliticsRight) | (Self::PoliticsRight, Self::PoliticsLeft)
        )
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_name())
    }
}
