//! Runtime - the entry point hosts talk to
//!
//! Owns the engine registry and the two task supervisors. Every method
//! records its error on the calling thread's last-error channel before
//! returning it, so C-style callers can fetch the message afterwards.
//!
//! Example usage:
//! ```ignore
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let engine = runtime.engine_open("htdemucs.onnx", BackendPreference::Auto)?;
//! let job = runtime.job_start(engine, request)?;
//! while !runtime.job_poll(job)?.state.is_terminal() { /* ... */ }
//! let result = runtime.job_result(job)?;
//! runtime.job_destroy(job)?;
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::config::{resolve_config_path, RuntimeConfig};
use crate::engine::{
    DefaultLoader, EngineContext, EngineDefaults, EngineLoader, EngineRegistry, PlatformClass,
};
use crate::error::{Result, StemkitError};
use crate::last_error::track;
use crate::pipeline::{PrepareRequest, SeparationRequest};
use crate::result::{PrepareResult, SeparationResult};
use crate::task::{PrepareKind, SeparationKind, TaskSnapshot, TaskSupervisor};
use crate::types::{BackendPreference, Handle, JobStage, PrepareStage, INVALID_HANDLE};

/// Output prefix used for prepare tasks when the caller gives none
pub const DEFAULT_PREPARE_PREFIX: &str = "input";

/// Output prefix used for separation jobs when the caller gives none
pub const DEFAULT_SEPARATION_PREFIX: &str = "separated";

pub struct Runtime {
    config: RuntimeConfig,
    engines: EngineRegistry,
    prepares: TaskSupervisor<PrepareKind>,
    jobs: TaskSupervisor<SeparationKind>,
}

impl Runtime {
    /// Create a runtime whose engines come from the built-in loader
    pub fn new(config: RuntimeConfig) -> Self {
        let loader = DefaultLoader::new(config.engine.clone());
        Self::with_loader(config, loader)
    }

    /// Create a runtime with the configuration file found on this machine
    pub fn from_config_file() -> Self {
        let path = resolve_config_path();
        log::info!("Loading runtime config from {:?}", path);
        Self::new(RuntimeConfig::load(&path))
    }

    /// Create a runtime that builds engines with `loader`
    pub fn with_loader(config: RuntimeConfig, loader: impl EngineLoader + 'static) -> Self {
        let platform = config.platform.unwrap_or_else(PlatformClass::current);
        log::info!("Runtime starting (platform: {:?})", platform);
        Self {
            engines: EngineRegistry::new(loader, platform),
            prepares: TaskSupervisor::new(PrepareKind),
            jobs: TaskSupervisor::new(SeparationKind {
                encode: config.encode.clone(),
            }),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Engines
    // ─────────────────────────────────────────────────────────────────────

    pub fn engine_open(&self, model_path: impl AsRef<Path>, backend: BackendPreference) -> Result<Handle> {
        track(self.engines.open(model_path, backend))
    }

    pub fn engine_defaults(&self, engine: Handle) -> Result<EngineDefaults> {
        track(self.engines.defaults(engine))
    }

    pub fn engine_close(&self, engine: Handle) -> Result<()> {
        track(self.engines.close(engine))
    }

    fn require_engine(&self, engine: Handle) -> Result<Arc<EngineContext>> {
        self.engines
            .find(engine)
            .ok_or_else(|| StemkitError::NotFound("engine".to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Prepare tasks
    // ─────────────────────────────────────────────────────────────────────

    /// Start a prepare task. Engine handle 0 runs without an engine.
    pub fn prepare_start(&self, engine: Handle, request: PrepareRequest) -> Result<Handle> {
        let engine = if engine == INVALID_HANDLE {
            None
        } else {
            Some(track(self.require_engine(engine))?)
        };
        track(self.prepares.start(engine, request))
    }

    pub fn prepare_poll(&self, task: Handle) -> Result<TaskSnapshot<PrepareStage>> {
        track(self.prepares.poll(task))
    }

    pub fn prepare_cancel(&self, task: Handle) -> Result<()> {
        track(self.prepares.cancel(task))
    }

    pub fn prepare_result(&self, task: Handle) -> Result<PrepareResult> {
        track(self.prepares.result(task).map(|output| PrepareResult::from(&output)))
    }

    /// Destroy a prepare task, blocking until its worker has exited
    pub fn prepare_destroy(&self, task: Handle) -> Result<()> {
        track(self.prepares.destroy(task))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Separation jobs
    // ─────────────────────────────────────────────────────────────────────

    /// Start a separation job on an open engine
    pub fn job_start(&self, engine: Handle, request: SeparationRequest) -> Result<Handle> {
        let engine = track(self.require_engine(engine))?;
        track(self.jobs.start(Some(engine), request))
    }

    pub fn job_poll(&self, job: Handle) -> Result<TaskSnapshot<JobStage>> {
        track(self.jobs.poll(job))
    }

    pub fn job_cancel(&self, job: Handle) -> Result<()> {
        track(self.jobs.cancel(job))
    }

    pub fn job_result(&self, job: Handle) -> Result<SeparationResult> {
        track(self.jobs.result(job).map(|output| SeparationResult::from(&output)))
    }

    /// Destroy a job, blocking until its worker has exited
    pub fn job_destroy(&self, job: Handle) -> Result<()> {
        track(self.jobs.destroy(job))
    }

    /// Number of registered (not yet destroyed) prepare tasks and jobs
    pub fn task_counts(&self) -> (usize, usize) {
        (self.prepares.len(), self.jobs.len())
    }
}
