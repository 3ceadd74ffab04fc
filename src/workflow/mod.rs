//! Article Workflow
//!
//! Phase state machine driving one article from drafting to completion.

pub mod controller;
pub mod phase;
pub mod signal;

pub use controller::{PhaseController, WorkflowConfig, WorkflowError};
pub use phase::Phase;
pub use signal::{CompletionSignal, ReflectionOutcome};
