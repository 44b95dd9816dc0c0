//! Lock-free published status of a running task
//!
//! The worker stores with `Release`, pollers load with `Acquire`. A poller
//! that observes a terminal state and then takes the task's outcome lock is
//! guaranteed to see the outcome written before that state store.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crate::pipeline::Publisher;
use crate::types::{StageCode, TaskState};

/// One consistent-enough view of a task for a poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSnapshot<S> {
    pub state: TaskState,
    pub progress: f64,
    pub stage: S,
}

pub struct TaskStatus<S: StageCode> {
    state: AtomicU8,
    stage: AtomicU8,
    /// f64 bits
    progress: AtomicU64,
    cancel: AtomicBool,
    _stage: PhantomData<fn() -> S>,
}

impl<S: StageCode> TaskStatus<S> {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Pending as u8),
            stage: AtomicU8::new(S::IDLE.to_u8()),
            progress: AtomicU64::new(0.0f64.to_bits()),
            cancel: AtomicBool::new(false),
            _stage: PhantomData,
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stage(&self) -> S {
        S::from_u8(self.stage.load(Ordering::Acquire))
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> TaskSnapshot<S> {
        TaskSnapshot {
            state: self.state(),
            progress: self.progress(),
            stage: self.stage(),
        }
    }

    /// Move the state forward
    ///
    /// Returns false, leaving the state untouched, if `next` would not be a
    /// forward move (including any move out of a terminal state).
    pub fn advance(&self, next: TaskState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let current_state = TaskState::from_u8(current);
                if current_state.is_terminal() || (next as u8) <= current {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }

    /// Latch the cancellation flag. Returns true if it was already set.
    pub fn request_cancel(&self) -> bool {
        self.cancel.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Publish progress, never moving it backwards
    fn raise_progress(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        let _ = self
            .progress
            .fetch_update(Ordering::Release, Ordering::Relaxed, |bits| {
                (value > f64::from_bits(bits)).then(|| value.to_bits())
            });
    }
}

impl<S: StageCode> Default for TaskStatus<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StageCode> Publisher<S> for TaskStatus<S> {
    fn set_stage(&self, stage: S) {
        log::debug!("Stage -> {:?}", stage);
        self.stage.store(stage.to_u8(), Ordering::Release);
    }

    fn set_progress(&self, progress: f64) {
        self.raise_progress(progress);
    }

    fn cancel_requested(&self) -> bool {
        self.is_cancel_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStage;
    use std::sync::Arc;

    #[test]
    fn test_initial_snapshot() {
        let status = TaskStatus::<JobStage>::new();
        let snap = status.snapshot();
        assert_eq!(snap.state, TaskState::Pending);
        assert_eq!(snap.stage, JobStage::Idle);
        assert_eq!(snap.progress, 0.0);
        assert!(!status.is_cancel_requested());
    }

    #[test]
    fn test_state_never_regresses() {
        let status = TaskStatus::<JobStage>::new();
        assert!(status.advance(TaskState::Running));
        assert!(!status.advance(TaskState::Pending));
        assert!(!status.advance(TaskState::Running));
        assert!(status.advance(TaskState::Failed));
        assert!(!status.advance(TaskState::Cancelled));
        assert_eq!(status.state(), TaskState::Failed);
    }

    #[test]
    fn test_pending_can_finish_directly() {
        let status = TaskStatus::<JobStage>::new();
        assert!(status.advance(TaskState::Cancelled));
        assert_eq!(status.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let status = TaskStatus::<JobStage>::new();
        status.set_progress(0.5);
        status.set_progress(0.3);
        assert_eq!(status.progress(), 0.5);
        status.set_progress(7.0);
        assert_eq!(status.progress(), 1.0);
        status.set_progress(f64::NAN);
        assert_eq!(status.progress(), 1.0);
    }

    #[test]
    fn test_cancel_latches() {
        let status = TaskStatus::<JobStage>::new();
        assert!(!status.request_cancel());
        assert!(status.request_cancel());
        assert!(status.cancel_requested());
    }

    #[test]
    fn test_concurrent_progress_keeps_max() {
        let status = Arc::new(TaskStatus::<JobStage>::new());
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let status = Arc::clone(&status);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        status.set_progress((i * 4 + t) as f64 / 4000.0);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(status.progress(), 3999.0 / 4000.0);
    }
}
