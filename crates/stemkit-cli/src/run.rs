//! Drive single tasks to completion through a `Runtime`

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use stemkit_core::pipeline::{PrepareRequest, SeparationRequest};
use stemkit_core::result::{PrepareResult, SeparationResult};
use stemkit_core::task::TaskSnapshot;
use stemkit_core::{BackendPreference, Runtime, StemkitError, TaskState};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll until the task is terminal, logging stage changes
fn wait<S: std::fmt::Debug + PartialEq + Copy>(
    label: &str,
    timeout: Duration,
    poll: impl Fn() -> Result<TaskSnapshot<S>, StemkitError>,
) -> Result<TaskState> {
    let started = Instant::now();
    let mut last_stage = None;
    loop {
        let snapshot = poll().with_context(|| format!("{} poll failed", label))?;
        if last_stage != Some(snapshot.stage) {
            log::info!(
                "{}: {:?} ({:.0}%)",
                label,
                snapshot.stage,
                snapshot.progress * 100.0
            );
            last_stage = Some(snapshot.stage);
        }
        if snapshot.state.is_terminal() {
            return Ok(snapshot.state);
        }
        if started.elapsed() > timeout {
            bail!("{} timed out after {}s", label, timeout.as_secs());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run one prepare task and destroy it
pub fn prepare(
    runtime: &Runtime,
    input: &Path,
    work_dir: &Path,
    prefix: &str,
    timeout: Duration,
) -> Result<PrepareResult> {
    let request = PrepareRequest {
        input_path: input.to_path_buf(),
        work_dir: work_dir.to_path_buf(),
        output_prefix: prefix.to_string(),
    };
    let task = runtime.prepare_start(0, request).context("prepare start failed")?;

    let outcome = wait("prepare", timeout, || runtime.prepare_poll(task)).and_then(|state| {
        runtime
            .prepare_result(task)
            .with_context(|| format!("prepare ended {:?}", state))
    });
    runtime.prepare_destroy(task).context("prepare destroy failed")?;
    outcome
}

/// Open an engine, run one separation job on it, then release both
pub fn separate(
    runtime: &Runtime,
    model: &Path,
    backend: BackendPreference,
    request: SeparationRequest,
    timeout: Duration,
) -> Result<SeparationResult> {
    let engine = runtime
        .engine_open(model, backend)
        .with_context(|| format!("engine open failed for backend {}", backend.name()))?;

    let outcome = runtime
        .job_start(engine, request)
        .context("job start failed")
        .and_then(|job| {
            let outcome = wait("job", timeout, || runtime.job_poll(job)).and_then(|state| {
                runtime
                    .job_result(job)
                    .with_context(|| format!("job ended {:?}", state))
            });
            runtime.job_destroy(job).context("job destroy failed")?;
            outcome
        });

    runtime.engine_close(engine).context("engine close failed")?;
    outcome
}
