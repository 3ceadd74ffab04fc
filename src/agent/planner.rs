//! Reviewer Planner
//!
//! Assigns reviewer agents to memos:
//! - Static (source role, reviewer role) priority table
//! - MIN/MAX reviewers per memo
//! - Backfill from the roster in enumeration order when the table is thin
//!
//! The assignment is greedy and deterministic: equal priorities keep roster
//! order, never map iteration order.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::persona::{AgentRole, REVIEW_ROSTER};
use crate::pubsub::ReflectionPriority;

pub const MIN_REVIEWERS: usize = 2;
pub const MAX_REVIEWERS: usize = 3;

/// (source role, reviewer role) -> priority; higher is reviewed first
pub const DEFAULT_PRIORITIES: [(AgentRole, AgentRole, u32); 6] = [
    (AgentRole::PoliticsLeft, AgentRole::PoliticsRight, 5),
    (AgentRole::PoliticsRight, AgentRole::PoliticsLeft, 5),
    (AgentRole::Historian, AgentRole::Geopolitics, 4),
    (AgentRole::Geopolitics, AgentRole::Historian, 4),
    (AgentRole::Writer, AgentRole::Editor, 3),
    (AgentRole::Researcher, AgentRole::Historian, 3),
];

/// The part of a memo the planner looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoRef {
    pub id: Uuid,
    pub source_agent_id: String,
}

/// Reviewers chosen for one memo, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoAssignment {
    pub memo_id: Uuid,
    pub source_agent_id: String,
    pub reviewers: Vec<String>,
}

/// Planner output, in memo input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionPlan {
    assignments: Vec<MemoAssignment>,
}

impl ReflectionPlan {
    pub fn get(&self, memo_id: Uuid) -> Option<&[String]> {
        self.assignments
            .iter()
            .find(|a| a.memo_id == memo_id)
            .map(|a| a.reviewers.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoAssignment> {
        self.assignments.iter()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.iter().all(|a| a.reviewers.is_empty())
    }

    /// Number of (memo, reviewer) pairs
    pub fn total_reviews(&self) -> usize {
        self.assignments.iter().map(|a| a.reviewers.len()).sum()
    }
}

/// Greedy reviewer assignment
#[derive(Debug, Clone)]
pub struct ReviewerPlanner {
    priorities: Vec<(AgentRole, AgentRole, u32)>,
    /// agent name -> role, in enumeration order
    roster: Vec<(String, AgentRole)>,
    min_reviewers: usize,
    max_reviewers: usize,
}

impl Default for ReviewerPlanner {
    fn default() -> Self {
        Self {
            priorities: DEFAULT_PRIORITIES.to_vec(),
            roster: REVIEW_ROSTER
                .iter()
                .map(|role| (role.agent_name().to_string(), *role))
                .collect(),
            min_reviewers: MIN_REVIEWERS,
            max_reviewers: MAX_REVIEWERS,
        }
    }
}

impl ReviewerPlanner {
    pub fn new(
        priorities: Vec<(AgentRole, AgentRole, u32)>,
        roster: Vec<(String, AgentRole)>,
        min_reviewers: usize,
        max_reviewers: usize,
    ) -> Self {
        Self {
            priorities,
            roster,
            min_reviewers,
            max_reviewers: max_reviewers.max(min_reviewers),
        }
    }

    fn roster_role(&self, agent_name: &str) -> Option<AgentRole> {
        self.roster
            .iter()
            .find(|(name, _)| name == agent_name)
            .map(|(_, role)| *role)
    }

    fn priority(&self, source: AgentRole, reviewer: AgentRole) -> Option<u32> {
        self.priorities
            .iter()
            .find(|(s, r, _)| *s == source && *r == reviewer)
            .map(|(_, _, p)| *p)
    }

    /// Plan reviewers for every memo. Memos from agents outside the roster
    /// are left out of the plan; a repeated memo id keeps its first
    /// occurrence.
    pub fn plan(&self, memos: &[MemoRef]) -> ReflectionPlan {
        let mut plan = ReflectionPlan::default();

        for memo in memos {
            if plan.assignments.iter().any(|a| a.memo_id == memo.id) {
                debug!("Duplicate memo {} ignored by planner", memo.id);
                continue;
            }
            let Some(source_role) = self.roster_role(&memo.source_agent_id) else {
                warn!("Unknown memo source agent {}, no reviewers planned", memo.source_agent_id);
                continue;
            };

            let reviewers = self.reviewers_for(&memo.source_agent_id, source_role);
            debug!("Memo {} from {} -> {:?}", memo.id, memo.source_agent_id, reviewers);
            plan.assignments.push(MemoAssignment {
                memo_id: memo.id,
                source_agent_id: memo.source_agent_id.clone(),
                reviewers,
            });
        }

        plan
    }

    fn reviewers_for(&self, source_name: &str, source_role: AgentRole) -> Vec<String> {
        // One candidate per role: the first roster name holding it
        let mut seen_roles: Vec<AgentRole> = Vec::new();
        let mut candidates: Vec<(&str, u32)> = Vec::new();
        for (name, role) in &self.roster {
            if name == source_name || seen_roles.contains(role) {
                continue;
            }
            if let Some(priority) = self.priority(source_role, *role) {
                seen_roles.push(*role);
                candidates.push((name.as_str(), priority));
            }
        }

        // Stable: equal priorities stay in roster order
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let take = candidates.len().min(self.max_reviewers);
        let mut chosen: Vec<String> = candidates
            .into_iter()
            .take(take)
            .map(|(name, _)| name.to_string())
            .collect();

        if chosen.len() < self.min_reviewers {
            for (name, _) in &self.roster {
                if chosen.len() >= self.min_reviewers {
                    break;
                }
                if name != source_name && !chosen.contains(name) {
                    chosen.push(name.clone());
                }
            }
        }

        chosen
    }
}

/// Request text for one reviewer looking at one memo
pub fn reviewer_prompt(reviewer: &str, source_agent_id: &str) -> String {
    let mut prompt = format!(
        "Please provide a thorough reflection on this memo from {}. \
         Assess its factual accuracy, bias, quality, and suggestions for improvement. \
         Consider the article topic and your specialized expertise.",
        source_agent_id
    );

    let reviewer_role = AgentRole::from_agent_name(reviewer);
    let source_role = AgentRole::from_agent_name(source_agent_id);
    match (reviewer_role, source_role) {
        (Some(AgentRole::PoliticsLeft), Some(AgentRole::PoliticsRight)) => {
            prompt.push_str(" Pay particular attention to potential conservative bias.");
        }
        (Some(AgentRole::PoliticsRight), Some(AgentRole::PoliticsLeft)) => {
            prompt.push_str(" Pay particular attention to potential progressive bias.");
        }
        (Some(AgentRole::Historian), _) => {
            prompt.push_str(" Focus especially on historical accuracy and context.");
        }
        (Some(AgentRole::Geopolitics), _) => {
            prompt.push_str(" Focus on international relations and cross-border implications.");
        }
        _ => {}
    }

    prompt
}

/// HIGH for opposing viewpoints, MEDIUM otherwise
pub fn review_priority(reviewer: &str, source_agent_id: &str) -> ReflectionPriority {
    match (
        AgentRole::from_agent_name(reviewer),
        AgentRole::from_agent_name(source_agent_id),
    ) {
        (Some(r), Some(s)) if r.is_opposing(s) => ReflectionPriority::High,
        _ => ReflectionPriority::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memo(source: &str) -> MemoRef {
        MemoRef {
            id: Uuid::new_v4(),
            source_agent_id: source.to_string(),
        }
    }

    fn reviewers(source: &str) -> Vec<String> {
        let m = memo(source);
        ReviewerPlanner::default()
            .plan(&[m.clone()])
            .get(m.id)
            .map(|r| r.to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn test_politics_left_gets_opposing_reviewer() {
        let plan = reviewers("Politics-Left");
        assert_eq!(plan, vec!["Politics-Right", "Researcher"]);
        assert!((MIN_REVIEWERS..=MAX_REVIEWERS).contains(&plan.len()));
    }

    #[test]
    fn test_backfill_follows_roster_order() {
        assert_eq!(reviewers("Researcher"), vec!["Historian", "Writer"]);
        assert_eq!(reviewers("Writer"), vec!["Chief Editor", "Researcher"]);
        assert_eq!(reviewers("Historian"), vec!["Geopolitics", "Researcher"]);
        assert_eq!(reviewers("Geopolitics"), vec!["Historian", "Researcher"]);
        assert_eq!(reviewers("Politics-Right"), vec!["Politics-Left", "Researcher"]);
    }

    #[test]
    fn test_source_never_reviews_itself() {
        for role in REVIEW_ROSTER {
            let plan = reviewers(role.agent_name());
            assert!(!plan.iter().any(|r| r == role.agent_name()));
            assert!(plan.len() >= MIN_REVIEWERS);
        }
    }

    #[test]
    fn test_max_caps_table_candidates() {
        let priorities = vec![
            (AgentRole::Writer, AgentRole::Editor, 1),
            (AgentRole::Writer, AgentRole::Researcher, 2),
            (AgentRole::Writer, AgentRole::Historian, 2),
            (AgentRole::Writer, AgentRole::Geopolitics, 9),
        ];
        let roster = REVIEW_ROSTER
            .iter()
            .map(|r| (r.agent_name().to_string(), *r))
            .collect();
        let planner = ReviewerPlanner::new(priorities, roster, 2, 3);

        let m = memo("Writer");
        let plan = planner.plan(&[m.clone()]);
        assert_eq!(
            plan.get(m.id).unwrap(),
            ["Geopolitics", "Researcher", "Historian"]
        );
    }

    #[test]
    fn test_unknown_source_and_duplicates() {
        let known = memo("Writer");
        let plan = ReviewerPlanner::default().plan(&[memo("Astrologer"), known.clone(), known.clone()]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.total_reviews(), 2);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_source_outside_roster_is_not_planned() {
        let artist = memo("Graphic Artist");
        let plan = ReviewerPlanner::default().plan(&[artist.clone()]);
        assert!(plan.get(artist.id).is_none());
        assert_eq!(plan.len(), 0);

        // A known persona dropped from a custom roster is skipped too
        let roster = REVIEW_ROSTER
            .iter()
            .filter(|r| **r != AgentRole::Historian)
            .map(|r| (r.agent_name().to_string(), *r))
            .collect();
        let planner = ReviewerPlanner::new(DEFAULT_PRIORITIES.to_vec(), roster, 2, 3);
        let historian = memo("Historian");
        let geopolitics = memo("Geopolitics");
        let plan = planner.plan(&[historian.clone(), geopolitics.clone()]);

        assert!(plan.get(historian.id).is_none());
        assert_eq!(plan.get(geopolitics.id).unwrap(), ["Researcher", "Writer"]);
    }

    #[test]
    fn test_prompts_and_priorities() {
        let p = reviewer_prompt("Politics-Right", "Politics-Left");
        assert!(p.starts_with("Please provide a thorough reflection on this memo from Politics-Left."));
        assert!(p.ends_with("potential progressive bias."));
        assert!(reviewer_prompt("Politics-Left", "Politics-Right").ends_with("conservative bias."));
        assert!(reviewer_prompt("Historian", "Researcher").ends_with("historical accuracy and context."));
        assert!(reviewer_prompt("Geopolitics", "Historian").ends_with("cross-border implications."));
        assert!(reviewer_prompt("Writer", "Researcher").ends_with("your specialized expertise."));

        assert_eq!(review_priority("Politics-Right", "Politics-Left"), ReflectionPriority::High);
        assert_eq!(review_priority("Researcher", "Politics-Left"), ReflectionPriority::Medium);
    }
}
