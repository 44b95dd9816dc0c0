//! Staged pipelines run by task workers
//!
//! A pipeline is a fixed sequence of stages. Each stage gets a cancellation
//! predicate and a progress sink rescaled into the stage's sub-range of
//! overall progress (see [`progress`]). The orchestrator also checks for
//! cancellation at every stage boundary, so a request is honoured even when
//! a stage finishes before noticing it.

mod prepare;
pub mod progress;
mod separate;

pub use prepare::{canonical_file_name, run_prepare, PrepareOutput, PrepareRequest};
pub use separate::{run_separation, stem_file_name, SeparationOutput, SeparationRequest};

use crate::error::StageError;
use crate::types::StageCode;

/// Where a pipeline publishes its stage and progress
///
/// Implemented by the task status record; tests use recording stubs.
pub trait Publisher<S: StageCode>: Sync {
    fn set_stage(&self, stage: S);
    fn set_progress(&self, progress: f64);
    fn cancel_requested(&self) -> bool;
}

/// Terminal failure of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Cancelled(String),
    Failed(String),
}

#[cfg(test)]
impl Failure {
    pub fn reason(&self) -> &str {
        match self {
            Self::Cancelled(reason) | Self::Failed(reason) => reason,
        }
    }
}

/// Reason recorded for cancelled tasks
pub const CANCELLED_REASON: &str = "cancelled";

/// Classify a stage error
///
/// A cancellation request takes priority over whatever the stage reported.
/// Other failures keep the stage's message behind `fallback`, or just
/// `fallback` when the message is empty.
pub fn classify(error: StageError, cancel_requested: bool, fallback: &str) -> Failure {
    if cancel_requested || error.is_cancelled() {
        return Failure::Cancelled(CANCELLED_REASON.to_string());
    }
    let message = error.to_string();
    if message.trim().is_empty() {
        Failure::Failed(fallback.to_string())
    } else {
        Failure::Failed(format!("{}: {}", fallback, message))
    }
}

/// Stage-boundary cancellation check
fn checkpoint<S: StageCode>(publisher: &dyn Publisher<S>) -> Result<(), Failure> {
    if publisher.cancel_requested() {
        Err(Failure::Cancelled(CANCELLED_REASON.to_string()))
    } else {
        Ok(())
    }
}
