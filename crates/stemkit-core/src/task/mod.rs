//! Task supervision for prepare tasks and separation jobs
//!
//! Both task types share [`TaskSupervisor`]; they differ only in their
//! [`TaskKind`]: what a valid request looks like and which pipeline the
//! worker runs.

mod status;
mod supervisor;

pub use status::{TaskSnapshot, TaskStatus};
pub use supervisor::{TaskKind, TaskSupervisor};

use crate::config::EncodeConfig;
use crate::engine::EngineContext;
use crate::error::{Result, StemkitError};
use crate::pipeline::{
    run_prepare, run_separation, Failure, PrepareOutput, PrepareRequest, SeparationOutput,
    SeparationRequest,
};
use crate::types::{JobStage, PrepareStage};

fn require_path(path: &std::path::Path, name: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        Err(StemkitError::InvalidArgument(name.to_string()))
    } else {
        Ok(())
    }
}

/// Decode + normalise to the canonical 44.1 kHz stereo WAV
#[derive(Debug, Default)]
pub struct PrepareKind;

impl TaskKind for PrepareKind {
    type Stage = PrepareStage;
    type Request = PrepareRequest;
    type Output = PrepareOutput;

    const NAME: &'static str = "prepare task";
    const THREAD_PREFIX: &'static str = "stemkit-prepare";
    const FAILED_REASON: &'static str = "prepare failed";

    fn validate(&self, _engine: Option<&EngineContext>, request: &PrepareRequest) -> Result<()> {
        require_path(&request.input_path, "input_path")?;
        require_path(&request.work_dir, "work_dir")
    }

    fn run(
        &self,
        engine: Option<&EngineContext>,
        request: &PrepareRequest,
        status: &TaskStatus<PrepareStage>,
    ) -> std::result::Result<PrepareOutput, Failure> {
        run_prepare(engine, request, status)
    }
}

/// Decode + infer + encode one file per stem
#[derive(Debug, Default)]
pub struct SeparationKind {
    pub encode: EncodeConfig,
}

impl TaskKind for SeparationKind {
    type Stage = JobStage;
    type Request = SeparationRequest;
    type Output = SeparationOutput;

    const NAME: &'static str = "job";
    const THREAD_PREFIX: &'static str = "stemkit-job";
    const FAILED_REASON: &'static str = "job failed";

    fn validate(&self, engine: Option<&EngineContext>, request: &SeparationRequest) -> Result<()> {
        if engine.is_none() {
            return Err(StemkitError::NotFound("engine".to_string()));
        }
        match request.model_input() {
            Some(path) if !path.as_os_str().is_empty() => {}
            _ => {
                return Err(StemkitError::InvalidArgument(
                    "input_path or prepared_input_path".to_string(),
                ))
            }
        }
        require_path(&request.output_dir, "output_dir")
    }

    fn run(
        &self,
        engine: Option<&EngineContext>,
        request: &SeparationRequest,
        status: &TaskStatus<JobStage>,
    ) -> std::result::Result<SeparationOutput, Failure> {
        let engine = engine.ok_or_else(|| Failure::Failed("engine not found".to_string()))?;
        run_separation(engine, request, &self.encode, status)
    }
}
