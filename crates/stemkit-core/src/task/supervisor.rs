//! Task supervisor - one worker thread per task behind integer handles

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use super::status::{TaskSnapshot, TaskStatus};
use crate::engine::EngineContext;
use crate::error::{Result, StemkitError};
use crate::handle::HandleTable;
use crate::pipeline::{Failure, CANCELLED_REASON};
use crate::types::{Handle, StageCode, TaskState};

/// A kind of task the supervisor can run
///
/// Implemented once for prepare tasks and once for separation jobs; the
/// supervisor itself is identical for both.
pub trait TaskKind: Send + Sync + 'static {
    type Stage: StageCode;
    type Request: Send + Sync + std::fmt::Debug + 'static;
    type Output: Clone + Send + 'static;

    /// Noun used in errors and logs ("job", "prepare task")
    const NAME: &'static str;
    /// Prefix of worker thread names
    const THREAD_PREFIX: &'static str;
    /// Reason recorded when a failure carries no message
    const FAILED_REASON: &'static str;

    /// Reject a request before anything is registered
    fn validate(&self, engine: Option<&EngineContext>, request: &Self::Request) -> Result<()>;

    /// Run the pipeline on the worker thread
    fn run(
        &self,
        engine: Option<&EngineContext>,
        request: &Self::Request,
        status: &TaskStatus<Self::Stage>,
    ) -> std::result::Result<Self::Output, Failure>;
}

enum Outcome<T> {
    Succeeded(T),
    Failed(String),
    Cancelled(String),
}

struct TaskContext<K: TaskKind> {
    handle: Handle,
    engine: Option<Arc<EngineContext>>,
    request: K::Request,
    status: TaskStatus<K::Stage>,
    outcome: Mutex<Option<Outcome<K::Output>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: TaskKind> TaskContext<K> {
    fn outcome(&self) -> MutexGuard<'_, Option<Outcome<K::Output>>> {
        self.outcome.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Latch cancellation
    ///
    /// Taken under the outcome lock so a request either lands before the
    /// worker classifies its result or after the task is already terminal.
    fn request_cancel(&self) {
        let _outcome = self.outcome();
        self.status.request_cancel();
    }

    /// Record the outcome, then publish the terminal state
    fn finish(&self, result: std::result::Result<K::Output, Failure>) -> TaskState {
        let mut slot = self.outcome();
        let cancelled = self.status.is_cancel_requested();

        let (outcome, state) = match result {
            Ok(_) | Err(Failure::Failed(_)) if cancelled => (
                Outcome::Cancelled(CANCELLED_REASON.to_string()),
                TaskState::Cancelled,
            ),
            Ok(output) => (Outcome::Succeeded(output), TaskState::Succeeded),
            Err(Failure::Cancelled(reason)) => (
                Outcome::Cancelled(non_empty(reason, CANCELLED_REASON)),
                TaskState::Cancelled,
            ),
            Err(Failure::Failed(reason)) => (
                Outcome::Failed(non_empty(reason, K::FAILED_REASON)),
                TaskState::Failed,
            ),
        };

        *slot = Some(outcome);
        self.status.advance(state);
        state
    }
}

fn non_empty(reason: String, fallback: &str) -> String {
    if reason.trim().is_empty() {
        fallback.to_string()
    } else {
        reason
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Supervisor for one kind of task
pub struct TaskSupervisor<K: TaskKind> {
    kind: Arc<K>,
    tasks: HandleTable<TaskContext<K>>,
}

impl<K: TaskKind> TaskSupervisor<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind: Arc::new(kind),
            tasks: HandleTable::new(),
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Register a task and spawn its worker
    ///
    /// The handle is only returned once the worker is running; if the
    /// thread cannot be spawned the registration is rolled back.
    pub fn start(&self, engine: Option<Arc<EngineContext>>, request: K::Request) -> Result<Handle> {
        self.kind.validate(engine.as_deref(), &request)?;

        let (handle, context) = self.tasks.insert_with(|handle| {
            Arc::new(TaskContext {
                handle,
                engine,
                request,
                status: TaskStatus::new(),
                outcome: Mutex::new(None),
                worker: Mutex::new(None),
            })
        });

        // Hold the worker slot until the join handle is stored, so a
        // concurrent destroy always finds something to join
        let mut slot = context.worker();
        let kind = Arc::clone(&self.kind);
        let worker_context = Arc::clone(&context);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", K::THREAD_PREFIX, handle))
            .spawn(move || Self::run_worker(&kind, &worker_context));

        match spawned {
            Ok(join) => {
                *slot = Some(join);
                log::info!("Started {} {}: {:?}", K::NAME, handle, context.request);
                Ok(handle)
            }
            Err(e) => {
                drop(slot);
                self.tasks.remove(handle);
                Err(StemkitError::Runtime(format!(
                    "Failed to spawn {} worker thread: {}",
                    K::NAME,
                    e
                )))
            }
        }
    }

    fn run_worker(kind: &K, context: &TaskContext<K>) {
        context.status.advance(TaskState::Running);

        let result = catch_unwind(AssertUnwindSafe(|| {
            kind.run(context.engine.as_deref(), &context.request, &context.status)
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            log::error!("{} {} worker panicked: {}", K::NAME, context.handle, message);
            Err(Failure::Failed(format!("{}: {}", K::FAILED_REASON, message)))
        });

        let state = context.finish(result);
        match state {
            TaskState::Succeeded => log::info!("{} {} succeeded", K::NAME, context.handle),
            _ => {
                let reason = match context.outcome().as_ref() {
                    Some(Outcome::Failed(r)) | Some(Outcome::Cancelled(r)) => r.clone(),
                    _ => String::new(),
                };
                log::warn!("{} {} ended {:?}: {}", K::NAME, context.handle, state, reason);
            }
        }
    }

    fn find(&self, handle: Handle) -> Result<Arc<TaskContext<K>>> {
        self.tasks
            .get(handle)
            .ok_or_else(|| StemkitError::NotFound(K::NAME.to_string()))
    }

    /// Current state, progress and stage. Never blocks on the worker.
    pub fn poll(&self, handle: Handle) -> Result<TaskSnapshot<K::Stage>> {
        Ok(self.find(handle)?.status.snapshot())
    }

    /// Request cancellation. Idempotent; does not wait.
    pub fn cancel(&self, handle: Handle) -> Result<()> {
        let context = self.find(handle)?;
        context.request_cancel();
        log::debug!("Cancel requested for {} {}", K::NAME, handle);
        Ok(())
    }

    /// Output of a succeeded task, or the reason it did not succeed
    pub fn result(&self, handle: Handle) -> Result<K::Output> {
        let context = self.find(handle)?;
        if !context.status.state().is_terminal() {
            return Err(StemkitError::Runtime(format!("{} is not completed yet", K::NAME)));
        }

        let outcome = context.outcome();
        // Re-check under the lock before trusting the outcome
        match (context.status.state(), outcome.as_ref()) {
            (TaskState::Succeeded, Some(Outcome::Succeeded(output))) => Ok(output.clone()),
            (TaskState::Cancelled, Some(Outcome::Cancelled(reason))) => {
                Err(StemkitError::Cancelled(non_empty(reason.clone(), CANCELLED_REASON)))
            }
            (TaskState::Cancelled, _) => Err(StemkitError::Cancelled(CANCELLED_REASON.to_string())),
            (TaskState::Failed, Some(Outcome::Failed(reason))) => {
                Err(StemkitError::Runtime(non_empty(reason.clone(), K::FAILED_REASON)))
            }
            (TaskState::Failed, _) => Err(StemkitError::Runtime(K::FAILED_REASON.to_string())),
            _ => Err(StemkitError::Runtime(format!("{} is not completed yet", K::NAME))),
        }
    }

    /// Remove a task, cancel it and wait for its worker to exit
    pub fn destroy(&self, handle: Handle) -> Result<()> {
        let context = self
            .tasks
            .remove(handle)
            .ok_or_else(|| StemkitError::NotFound(K::NAME.to_string()))?;
        Self::shutdown(&context);
        log::info!("Destroyed {} {}", K::NAME, handle);
        Ok(())
    }

    fn shutdown(context: &TaskContext<K>) {
        context.request_cancel();
        let join = context.worker().take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                log::warn!("{} {} destroyed from its own worker", K::NAME, context.handle);
                return;
            }
            if join.join().is_err() {
                log::error!("{} {} worker did not exit cleanly", K::NAME, context.handle);
            }
        }
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<K: TaskKind> Drop for TaskSupervisor<K> {
    fn drop(&mut self) {
        for (handle, context) in self.tasks.drain() {
            log::debug!("Stopping {} {} on shutdown", K::NAME, handle);
            Self::shutdown(&context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Publisher;
    use crate::types::JobStage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// What the scripted worker should do
    #[derive(Debug, Clone)]
    enum Script {
        Succeed(u32),
        Fail(&'static str),
        Panic,
        /// Spin until cancelled, counting iterations
        SpinUntilCancelled,
        /// Succeed while ignoring cancellation
        IgnoreCancel,
    }

    #[derive(Default)]
    struct ScriptKind {
        spins: AtomicUsize,
    }

    impl TaskKind for ScriptKind {
        type Stage = JobStage;
        type Request = Script;
        type Output = u32;

        const NAME: &'static str = "job";
        const THREAD_PREFIX: &'static str = "test-job";
        const FAILED_REASON: &'static str = "job failed";

        fn validate(&self, _engine: Option<&EngineContext>, request: &Script) -> Result<()> {
            match request {
                Script::Succeed(0) => Err(StemkitError::InvalidArgument("zero".into())),
                _ => Ok(()),
            }
        }

        fn run(
            &self,
            _engine: Option<&EngineContext>,
            request: &Script,
            status: &TaskStatus<JobStage>,
        ) -> std::result::Result<u32, Failure> {
            status.set_stage(JobStage::Infer);
            match request {
                Script::Succeed(value) => {
                    status.set_progress(1.0);
                    Ok(*value)
                }
                Script::Fail(reason) => Err(Failure::Failed(reason.to_string())),
                Script::Panic => panic!("boom"),
                Script::SpinUntilCancelled => loop {
                    self.spins.fetch_add(1, Ordering::SeqCst);
                    if status.cancel_requested() {
                        return Err(Failure::Cancelled(String::new()));
                    }
                    thread::sleep(Duration::from_millis(2));
                },
                Script::IgnoreCancel => {
                    thread::sleep(Duration::from_millis(50));
                    Ok(7)
                }
            }
        }
    }

    fn wait_terminal(supervisor: &TaskSupervisor<ScriptKind>, handle: Handle) -> TaskState {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = supervisor.poll(handle).unwrap().state;
            if state.is_terminal() {
                return state;
            }
            assert!(Instant::now() < deadline, "task {} never finished", handle);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_success_and_result() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::Succeed(42)).unwrap();
        assert_eq!(wait_terminal(&supervisor, handle), TaskState::Succeeded);
        assert_eq!(supervisor.result(handle).unwrap(), 42);

        let snap = supervisor.poll(handle).unwrap();
        assert_eq!(snap.progress, 1.0);
        assert_eq!(snap.stage, JobStage::Infer);
        supervisor.destroy(handle).unwrap();
    }

    #[test]
    fn test_invalid_request_registers_nothing() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let err = supervisor.start(None, Script::Succeed(0)).unwrap_err();
        assert!(matches!(err, StemkitError::InvalidArgument(_)));
        assert!(supervisor.is_empty());
    }

    #[test]
    fn test_failure_reason() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::Fail("decode failed: bad header")).unwrap();
        assert_eq!(wait_terminal(&supervisor, handle), TaskState::Failed);
        assert_eq!(
            supervisor.result(handle).unwrap_err(),
            StemkitError::Runtime("decode failed: bad header".into())
        );
    }

    #[test]
    fn test_empty_failure_uses_default_reason() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::Fail("")).unwrap();
        wait_terminal(&supervisor, handle);
        assert_eq!(
            supervisor.result(handle).unwrap_err(),
            StemkitError::Runtime("job failed".into())
        );
    }

    #[test]
    fn test_panic_becomes_failure() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::Panic).unwrap();
        assert_eq!(wait_terminal(&supervisor, handle), TaskState::Failed);
        let err = supervisor.result(handle).unwrap_err();
        assert_eq!(err, StemkitError::Runtime("job failed: boom".into()));
        supervisor.destroy(handle).unwrap();
    }

    #[test]
    fn test_cancel_running_task() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::SpinUntilCancelled).unwrap();
        supervisor.cancel(handle).unwrap();
        supervisor.cancel(handle).unwrap();

        assert_eq!(wait_terminal(&supervisor, handle), TaskState::Cancelled);
        assert_eq!(
            supervisor.result(handle).unwrap_err(),
            StemkitError::Cancelled("cancelled".into())
        );
    }

    #[test]
    fn test_cancel_wins_over_late_success() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::IgnoreCancel).unwrap();
        supervisor.cancel(handle).unwrap();
        assert_eq!(wait_terminal(&supervisor, handle), TaskState::Cancelled);
    }

    #[test]
    fn test_result_before_completion() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::SpinUntilCancelled).unwrap();
        let err = supervisor.result(handle).unwrap_err();
        assert_eq!(err, StemkitError::Runtime("job is not completed yet".into()));
        supervisor.destroy(handle).unwrap();
    }

    #[test]
    fn test_destroy_joins_worker() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::SpinUntilCancelled).unwrap();
        thread::sleep(Duration::from_millis(10));
        supervisor.destroy(handle).unwrap();

        let after_destroy = supervisor.kind().spins.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(supervisor.kind().spins.load(Ordering::SeqCst), after_destroy);
    }

    #[test]
    fn test_unknown_handles() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        for handle in [0, 99] {
            assert_eq!(supervisor.poll(handle).unwrap_err(), StemkitError::NotFound("job".into()));
            assert!(matches!(supervisor.cancel(handle), Err(StemkitError::NotFound(_))));
            assert!(matches!(supervisor.result(handle), Err(StemkitError::NotFound(_))));
            assert!(matches!(supervisor.destroy(handle), Err(StemkitError::NotFound(_))));
        }
    }

    #[test]
    fn test_destroyed_handle_is_gone() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let handle = supervisor.start(None, Script::Succeed(1)).unwrap();
        supervisor.destroy(handle).unwrap();
        assert!(matches!(supervisor.poll(handle), Err(StemkitError::NotFound(_))));
        assert!(matches!(supervisor.destroy(handle), Err(StemkitError::NotFound(_))));
    }

    #[test]
    fn test_drop_stops_workers() {
        let supervisor = TaskSupervisor::new(ScriptKind::default());
        let kind = Arc::clone(&supervisor.kind);
        supervisor.start(None, Script::SpinUntilCancelled).unwrap();
        drop(supervisor);

        let after_drop = kind.spins.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(kind.spins.load(Ordering::SeqCst), after_drop);
    }
}
