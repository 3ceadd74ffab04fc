//! Reflection Tracker
//!
//! In-memory index of reflection requests with a per-target-agent queue of
//! pending work. Lost on restart; durable reflection results live on the
//! article run.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::types::{ReflectionRequest, ReflectionStatus};

/// Tracker failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("Reflection not found: {0}")]
    NotFound(Uuid),

    #[error("Reflection already registered: {0}")]
    Duplicate(Uuid),

    #[error("Reflection {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ReflectionStatus,
        to: ReflectionStatus,
    },
}

/// Per-article counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ReflectionStats {
    /// Requests that have not reached a terminal status
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_progress
    }
}

#[derive(Default)]
struct TrackerState {
    requests: HashMap<Uuid, ReflectionRequest>,
    /// target agent -> ids still PENDING, in registration order
    queues: HashMap<String, Vec<Uuid>>,
}

impl TrackerState {
    fn dequeue(&mut self, agent_id: &str, id: Uuid) {
        if let Some(queue) = self.queues.get_mut(agent_id) {
            queue.retain(|queued| *queued != id);
            if queue.is_empty() {
                self.queues.remove(agent_id);
            }
        }
    }
}

/// Queue order: priority descending, then earliest deadline, no deadline last
fn queue_order(a: &ReflectionRequest, b: &ReflectionRequest) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| match (a.deadline, b.deadline) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}

/// Concurrency-safe reflection index shared by all article workflows
#[derive(Default)]
pub struct ReflectionTracker {
    state: RwLock<TrackerState>,
}

impl ReflectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and queue it for its target agent.
    ///
    /// An id is registered once; the existing entry is never replaced.
    pub fn add(&self, request: ReflectionRequest) -> Result<(), TrackerError> {
        let mut state = self.state.write();
        let id = request.id;
        if state.requests.contains_key(&id) {
            return Err(TrackerError::Duplicate(id));
        }

        if request.status == ReflectionStatus::Pending {
            state.queues.entry(request.target_agent_id.clone()).or_default().push(id);
        }
        state.requests.insert(id, request);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<ReflectionRequest> {
        self.state.read().requests.get(&id).cloned()
    }

    /// Set a new status along a legal edge.
    ///
    /// Repeating the current status is a no-op. Leaving PENDING removes the
    /// request from its target's queue.
    pub fn update_status(
        &self,
        id: Uuid,
        status: ReflectionStatus,
    ) -> Result<ReflectionRequest, TrackerError> {
        let mut state = self.state.write();
        let request = state.requests.get_mut(&id).ok_or(TrackerError::NotFound(id))?;

        let from = request.status;
        if from == status {
            return Ok(request.clone());
        }
        if !from.can_transition_to(status) {
            return Err(TrackerError::InvalidTransition { id, from, to: status });
        }

        request.status = status;
        let updated = request.clone();
        if from == ReflectionStatus::Pending {
            state.dequeue(&updated.target_agent_id, id);
        }

        debug!("Reflection {}: {} -> {}", id, from, status);
        Ok(updated)
    }

    /// Drive a request to COMPLETED or FAILED, claiming it first if it is
    /// still PENDING.
    pub fn settle(
        &self,
        id: Uuid,
        status: ReflectionStatus,
    ) -> Result<ReflectionRequest, TrackerError> {
        let current = self.get(id).ok_or(TrackerError::NotFound(id))?;
        if current.status == ReflectionStatus::Pending
            && matches!(status, ReflectionStatus::Completed | ReflectionStatus::Failed)
        {
            self.update_status(id, ReflectionStatus::InProgress)?;
        }
        self.update_status(id, status)
    }

    /// Pending requests for an agent in scheduling order
    pub fn agent_queue(&self, agent_id: &str) -> Vec<ReflectionRequest> {
        let state = self.state.read();
        let Some(queue) = state.queues.get(agent_id) else {
            return Vec::new();
        };

        let mut requests: Vec<ReflectionRequest> = queue
            .iter()
            .filter_map(|id| state.requests.get(id))
            .filter(|r| r.status == ReflectionStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by(queue_order);
        requests
    }

    pub fn stats(&self, article_id: Uuid) -> ReflectionStats {
        let state = self.state.read();
        let mut stats = ReflectionStats::default();

        for request in state.requests.values().filter(|r| r.article_id == article_id) {
            stats.total += 1;
            match request.status {
                ReflectionStatus::Pending => stats.pending += 1,
                ReflectionStatus::InProgress => stats.in_progress += 1,
                ReflectionStatus::Completed => stats.completed += 1,
                ReflectionStatus::Failed => stats.failed += 1,
                ReflectionStatus::Skipped => stats.skipped += 1,
            }
        }

        stats
    }

    pub fn len(&self) -> usize {
        self.state.read().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::types::ReflectionPriority;

    fn request(article_id: Uuid, target: &str) -> ReflectionRequest {
        ReflectionRequest::new(article_id, Uuid::new_v4(), "Chief Editor", target, "memo text")
    }

    #[test]
    fn test_add_and_get() {
        let tracker = ReflectionTracker::new();
        let req = request(Uuid::new_v4(), "Historian");
        let id = req.id;

        tracker.add(req).unwrap();

        let stored = tracker.get(id).unwrap();
        assert_eq!(stored.status, ReflectionStatus::Pending);
        assert_eq!(tracker.agent_queue("Historian").len(), 1);
        assert!(tracker.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_queue_order_priority_then_deadline() {
        let tracker = ReflectionTracker::new();
        let article_id = Uuid::new_v4();

        let no_deadline_high = request(article_id, "Writer").with_priority(ReflectionPriority::High);
        let late_high = request(article_id, "Writer")
            .with_priority(ReflectionPriority::High)
            .with_deadline(Some(200.0));
        let early_high = request(article_id, "Writer")
            .with_priority(ReflectionPriority::High)
            .with_deadline(Some(100.0));
        let medium = request(article_id, "Writer").with_deadline(Some(1.0));
        let critical = request(article_id, "Writer").with_priority(ReflectionPriority::Critical);

        let expected = vec![critical.id, early_high.id, late_high.id, no_deadline_high.id, medium.id];
        for r in [medium, no_deadline_high, late_high, critical, early_high] {
            tracker.add(r).unwrap();
        }

        let order: Vec<Uuid> = tracker.agent_queue("Writer").iter().map(|r| r.id).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn test_queue_only_holds_pending() {
        let tracker = ReflectionTracker::new();
        let article_id = Uuid::new_v4();
        let a = request(article_id, "Historian");
        let b = request(article_id, "Historian");
        let c = request(article_id, "Historian");
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        tracker.add(a).unwrap();
        tracker.add(b).unwrap();
        tracker.add(c).unwrap();

        tracker.update_status(a_id, ReflectionStatus::InProgress).unwrap();
        tracker.update_status(b_id, ReflectionStatus::Skipped).unwrap();

        let queue = tracker.agent_queue("Historian");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, c_id);
        assert!(queue.iter().all(|r| r.status == ReflectionStatus::Pending));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let tracker = ReflectionTracker::new();
        let req = request(Uuid::new_v4(), "Geopolitics");
        let id = req.id;
        tracker.add(req).unwrap();

        tracker.update_status(id, ReflectionStatus::InProgress).unwrap();
        tracker.update_status(id, ReflectionStatus::Completed).unwrap();

        let err = tracker.update_status(id, ReflectionStatus::Failed).unwrap_err();
        assert_eq!(
            err,
            TrackerError::InvalidTransition {
                id,
                from: ReflectionStatus::Completed,
                to: ReflectionStatus::Failed,
            }
        );
        // Same-status update is idempotent
        assert!(tracker.update_status(id, ReflectionStatus::Completed).is_ok());
        assert_eq!(tracker.get(id).unwrap().status, ReflectionStatus::Completed);
    }

    #[test]
    fn test_skip_only_from_pending() {
        let tracker = ReflectionTracker::new();
        let req = request(Uuid::new_v4(), "Writer");
        let id = req.id;
        tracker.add(req).unwrap();

        tracker.update_status(id, ReflectionStatus::InProgress).unwrap();
        assert!(tracker.update_status(id, ReflectionStatus::Skipped).is_err());
    }

    #[test]
    fn test_settle_claims_pending_first() {
        let tracker = ReflectionTracker::new();
        let req = request(Uuid::new_v4(), "Writer");
        let id = req.id;
        tracker.add(req).unwrap();

        let settled = tracker.settle(id, ReflectionStatus::Completed).unwrap();
        assert_eq!(settled.status, ReflectionStatus::Completed);
        assert!(tracker.agent_queue("Writer").is_empty());

        let skipped = request(Uuid::new_v4(), "Writer");
        let skipped_id = skipped.id;
        tracker.add(skipped).unwrap();
        tracker.update_status(skipped_id, ReflectionStatus::Skipped).unwrap();
        assert!(tracker.settle(skipped_id, ReflectionStatus::Failed).is_err());
        assert_eq!(tracker.get(skipped_id).unwrap().status, ReflectionStatus::Skipped);
    }

    #[test]
    fn test_add_keeps_existing_entry() {
        let tracker = ReflectionTracker::new();
        let req = request(Uuid::new_v4(), "Writer");
        let id = req.id;
        tracker.add(req.clone()).unwrap();
        tracker.settle(id, ReflectionStatus::Completed).unwrap();

        assert_eq!(tracker.add(req), Err(TrackerError::Duplicate(id)));
        assert_eq!(tracker.get(id).unwrap().status, ReflectionStatus::Completed);
        assert!(tracker.agent_queue("Writer").is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let tracker = ReflectionTracker::new();
        let id = Uuid::new_v4();
        assert_eq!(
            tracker.update_status(id, ReflectionStatus::Completed),
            Err(TrackerError::NotFound(id))
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_stats_scoped_to_article() {
        let tracker = ReflectionTracker::new();
        let article_a = Uuid::new_v4();
        let article_b = Uuid::new_v4();

        let done = request(article_a, "Historian");
        let done_id = done.id;
        tracker.add(done).unwrap();
        tracker.add(request(article_a, "Writer")).unwrap();
        tracker.add(request(article_b, "Writer")).unwrap();
        tracker.settle(done_id, ReflectionStatus::Completed).unwrap();

        let stats = tracker.stats(article_a);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.outstanding(), 1);
        assert_eq!(tracker.stats(article_b).total, 1);
    }
}
