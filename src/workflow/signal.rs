//! Reflection Completion Signal
//!
//! One authoritative "reflection phase is over" signal per article. It is
//! resolved exactly once, either because every planned reflection reported
//! back or because the soft wait ran out; later resolutions are ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// How the reflection phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReflectionOutcome {
    /// Every planned reflection completed or failed
    Complete,
    /// Soft wait expired with reflections still outstanding
    Degraded { outstanding: usize },
}

impl ReflectionOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ReflectionOutcome::Degraded { .. })
    }
}

/// Resolve-once signal observable from any number of tasks
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<Option<ReflectionOutcome>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Returns `true` only for the call that resolved the signal
    pub fn resolve(&self, outcome: ReflectionOutcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn outcome(&self) -> Option<ReflectionOutcome> {
        *self.tx.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the signal is resolved
    pub async fn wait(&self) -> ReflectionOutcome {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(outcome) = *rx.borrow_and_update() {
                return outcome;
            }
            // self owns the sender, so the channel stays open
            let _ = rx.changed().await;
        }
    }
}
