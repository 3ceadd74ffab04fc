//! Bias Aggregation
//!
//! Scores the reflections captured during an article run. The workflow only
//! depends on [`BiasScorer`]; [`KeywordBiasScorer`] is the bundled
//! heuristic, counting politically loaded terms in reviewer text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::store::ReflectionNote;

static LEFT_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:progressive|liberal|left-leaning|left-wing|democrat)\w*").unwrap()
});

static RIGHT_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:conservative|republican|right-leaning|right-wing|traditional)\w*").unwrap()
});

static NEUTRAL_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:balanced|neutral|fair|objective)\w*").unwrap()
});

static BIAS_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)bias").unwrap());

/// Strength of a detected lean
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasLevel {
    None,
    Mild,
    Moderate,
    Strong,
    Extreme,
}

impl BiasLevel {
    /// Level for a direction in [-1, 1]
    pub fn from_direction(direction: f64) -> Self {
        match direction.abs() {
            d if d < 0.2 => BiasLevel::None,
            d if d < 0.4 => BiasLevel::Mild,
            d if d < 0.6 => BiasLevel::Moderate,
            d if d < 0.8 => BiasLevel::Strong,
            _ => BiasLevel::Extreme,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BiasLevel::None => "none",
            BiasLevel::Mild => "mild",
            BiasLevel::Moderate => "moderate",
            BiasLevel::Strong => "strong",
            BiasLevel::Extreme => "extreme",
        }
    }
}

impl fmt::Display for BiasLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-reviewer counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBiasCounts {
    pub reflections_given: usize,
    pub bias_mentions: usize,
}

/// Article-level bias assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasAssessment {
    /// -1.0 (left) to 1.0 (right)
    pub direction: f64,
    pub level: BiasLevel,
    pub summary: String,
    #[serde(default)]
    pub left_terms: usize,
    #[serde(default)]
    pub right_terms: usize,
    #[serde(default)]
    pub neutral_terms: usize,
    #[serde(default)]
    pub by_agent: BTreeMap<String, AgentBiasCounts>,
}

/// Turns captured reflections into an assessment
pub trait BiasScorer: Send + Sync {
    fn score(&self, reflections: &BTreeMap<Uuid, Vec<ReflectionNote>>) -> BiasAssessment;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordBiasScorer;

impl BiasScorer for KeywordBiasScorer {
    fn score(&self, reflections: &BTreeMap<Uuid, Vec<ReflectionNote>>) -> BiasAssessment {
        let mut left = 0;
        let mut right = 0;
        let mut neutral = 0;
        let mut by_agent: BTreeMap<String, AgentBiasCounts> = BTreeMap::new();

        for note in reflections.values().flatten() {
            left += LEFT_TERMS.find_iter(&note.content).count();
            right += RIGHT_TERMS.find_iter(&note.content).count();
            neutral += NEUTRAL_TERMS.find_iter(&note.content).count();

            let counts = by_agent.entry(note.source_agent_id.clone()).or_default();
            counts.reflections_given += 1;
            if BIAS_MENTION.is_match(&note.content) {
                counts.bias_mentions += 1;
            }
        }

        let total = left + right;
        let direction = if total == 0 {
            0.0
        } else {
            (right as f64 - left as f64) / total as f64
        };

        let summary = if direction < -0.3 {
            "Left-leaning bias detected"
        } else if direction > 0.3 {
            "Right-leaning bias detected"
        } else {
            "Relatively balanced coverage"
        };

        BiasAssessment {
            direction,
            level: BiasLevel::from_direction(direction),
            summary: summary.to_string(),
            left_terms: left,
            right_terms: right,
            neutral_terms: neutral,
            by_agent,
        }
    }
}
