//! C ABI for stemkit
//!
//! Every function returns an [`ErrorCode`]; on failure the message is
//! available from `stemkit_last_error` on the same thread. Handles are
//! plain `u64` values and 0 is never a valid handle. Strings returned
//! through out-pointers are owned by the caller and must be released with
//! `stemkit_string_free`.
//!
//! All calls share one process-wide [`Runtime`], created on first use with
//! the configuration file named by `STEMKIT_CONFIG` (or the default path).

mod strings;

use std::any::Any;
use std::ffi::{c_char, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::OnceLock;

use stemkit_core::error::Result;
use stemkit_core::last_error::set_last_error;
use stemkit_core::pipeline::{PrepareRequest, SeparationRequest};
use stemkit_core::task::TaskSnapshot;
use stemkit_core::types::StageCode;
use stemkit_core::{
    BackendPreference, ErrorCode, Handle, OutputFormat, Runtime, StemkitError,
    DEFAULT_PREPARE_PREFIX, DEFAULT_SEPARATION_PREFIX,
};

use strings::{into_raw, last_error_ptr, optional_str, required_str};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        // The host may already have installed a logger
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .try_init();
        log::info!("stemkit {} runtime initialising", env!("CARGO_PKG_VERSION"));
        Runtime::from_config_file()
    })
}

/// Prepare task configuration
#[repr(C)]
pub struct StemkitPrepareConfig {
    pub input_path: *const c_char,
    pub work_dir: *const c_char,
    /// Null selects `"input"`
    pub output_prefix: *const c_char,
}

/// Separation job configuration
#[repr(C)]
pub struct StemkitJobConfig {
    /// Raw input; used when `prepared_input_path` is null
    pub input_path: *const c_char,
    pub prepared_input_path: *const c_char,
    pub output_dir: *const c_char,
    /// Null selects `"separated"`
    pub output_prefix: *const c_char,
    /// 0 = WAV, 1 = FLAC, 2 = MP3
    pub output_format: i32,
    /// <= 0 selects the engine default
    pub chunk_size: i32,
    /// <= 0 selects the engine default
    pub overlap: i32,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

/// Run one exported call: map its error to a code and keep panics on this side
fn guard(call: impl FnOnce() -> Result<()>) -> ErrorCode {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => ErrorCode::Ok,
        Ok(Err(e)) => {
            set_last_error(e.to_string());
            e.code()
        }
        Err(payload) => {
            let message = format!("native panic: {}", panic_message(payload.as_ref()));
            log::error!("{}", message);
            set_last_error(message);
            ErrorCode::Runtime
        }
    }
}

fn out_ref<'a, T>(ptr: *mut T, name: &str) -> Result<&'a mut T> {
    // SAFETY: the caller hands us either null or a valid, writable pointer
    unsafe { ptr.as_mut() }.ok_or_else(|| StemkitError::InvalidArgument(name.to_string()))
}

/// Validate the poll out-pointers, then poll and fill them
fn write_snapshot<S: StageCode>(
    poll: impl FnOnce() -> Result<TaskSnapshot<S>>,
    out_state: *mut i32,
    out_progress: *mut f64,
    out_stage: *mut i32,
) -> Result<()> {
    let state = out_ref(out_state, "state output")?;
    let progress = out_ref(out_progress, "progress output")?;
    let stage = out_ref(out_stage, "stage output")?;
    let snapshot = poll()?;
    *state = snapshot.state.code();
    *progress = snapshot.progress;
    *stage = snapshot.stage.to_u8() as i32;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────
// Engines
// ─────────────────────────────────────────────────────────────────────────

/// Load a model. `backend`: 0 auto, 1 cpu, 2 vulkan, 3 cuda, 4 metal.
///
/// # Safety
/// `model_path` must be null or a NUL-terminated string; `out_engine` must
/// be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_engine_open(
    model_path: *const c_char,
    backend: i32,
    out_engine: *mut Handle,
) -> ErrorCode {
    guard(|| {
        let model_path = required_str(model_path, "model_path")?;
        let out = out_ref(out_engine, "engine output")?;
        *out = runtime().engine_open(model_path, BackendPreference::from_code(backend))?;
        Ok(())
    })
}

/// # Safety
/// Output pointers must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_engine_get_defaults(
    engine: Handle,
    out_chunk_size: *mut i32,
    out_overlap: *mut i32,
    out_sample_rate: *mut i32,
) -> ErrorCode {
    guard(|| {
        let chunk_size = out_ref(out_chunk_size, "defaults output")?;
        let overlap = out_ref(out_overlap, "defaults output")?;
        let sample_rate = out_ref(out_sample_rate, "defaults output")?;
        let defaults = runtime().engine_defaults(engine)?;
        *chunk_size = defaults.chunk_size as i32;
        *overlap = defaults.overlap as i32;
        *sample_rate = defaults.sample_rate as i32;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn stemkit_engine_close(engine: Handle) -> ErrorCode {
    guard(|| runtime().engine_close(engine))
}

// ─────────────────────────────────────────────────────────────────────────
// Prepare tasks
// ─────────────────────────────────────────────────────────────────────────

/// Start decoding `input_path` to the canonical WAV in `work_dir`.
/// `engine` may be 0.
///
/// # Safety
/// `config` must be null or point to a valid config whose strings are null
/// or NUL-terminated; `out_task` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_prepare_start(
    engine: Handle,
    config: *const StemkitPrepareConfig,
    out_task: *mut Handle,
) -> ErrorCode {
    guard(|| {
        let config = config
            .as_ref()
            .ok_or_else(|| StemkitError::InvalidArgument("prepare start config".to_string()))?;
        let out = out_ref(out_task, "prepare output")?;
        let request = PrepareRequest {
            input_path: PathBuf::from(required_str(config.input_path, "input_path")?),
            work_dir: PathBuf::from(required_str(config.work_dir, "work_dir")?),
            output_prefix: optional_str(config.output_prefix, "output_prefix")?
                .unwrap_or(DEFAULT_PREPARE_PREFIX)
                .to_string(),
        };
        *out = runtime().prepare_start(engine, request)?;
        Ok(())
    })
}

/// # Safety
/// Output pointers must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_prepare_poll(
    task: Handle,
    out_state: *mut i32,
    out_progress: *mut f64,
    out_stage: *mut i32,
) -> ErrorCode {
    guard(|| {
        write_snapshot(|| runtime().prepare_poll(task), out_state, out_progress, out_stage)
    })
}

#[no_mangle]
pub extern "C" fn stemkit_prepare_cancel(task: Handle) -> ErrorCode {
    guard(|| runtime().prepare_cancel(task))
}

/// # Safety
/// `out_json` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_prepare_get_result_json(
    task: Handle,
    out_json: *mut *mut c_char,
) -> ErrorCode {
    guard(|| {
        let out = out_ref(out_json, "result output")?;
        *out = into_raw(runtime().prepare_result(task)?.to_json())?;
        Ok(())
    })
}

/// Blocks until the task's worker has exited
#[no_mangle]
pub extern "C" fn stemkit_prepare_destroy(task: Handle) -> ErrorCode {
    guard(|| runtime().prepare_destroy(task))
}

// ─────────────────────────────────────────────────────────────────────────
// Separation jobs
// ─────────────────────────────────────────────────────────────────────────

/// Start separating into one file per stem under `output_dir`
///
/// # Safety
/// Same contract as [`stemkit_prepare_start`].
#[no_mangle]
pub unsafe extern "C" fn stemkit_job_start(
    engine: Handle,
    config: *const StemkitJobConfig,
    out_job: *mut Handle,
) -> ErrorCode {
    guard(|| {
        let config = config
            .as_ref()
            .ok_or_else(|| StemkitError::InvalidArgument("job start config".to_string()))?;
        let out = out_ref(out_job, "job output")?;
        let request = SeparationRequest {
            input_path: optional_str(config.input_path, "input_path")?.map(PathBuf::from),
            prepared_input_path: optional_str(config.prepared_input_path, "prepared_input_path")?
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            output_dir: PathBuf::from(required_str(config.output_dir, "output_dir")?),
            output_prefix: optional_str(config.output_prefix, "output_prefix")?
                .unwrap_or(DEFAULT_SEPARATION_PREFIX)
                .to_string(),
            output_format: OutputFormat::from_code(config.output_format),
            chunk_size: Some(config.chunk_size),
            overlap: Some(config.overlap),
        };
        *out = runtime().job_start(engine, request)?;
        Ok(())
    })
}

/// # Safety
/// Output pointers must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_job_poll(
    job: Handle,
    out_state: *mut i32,
    out_progress: *mut f64,
    out_stage: *mut i32,
) -> ErrorCode {
    guard(|| write_snapshot(|| runtime().job_poll(job), out_state, out_progress, out_stage))
}

#[no_mangle]
pub extern "C" fn stemkit_job_cancel(job: Handle) -> ErrorCode {
    guard(|| runtime().job_cancel(job))
}

/// # Safety
/// `out_json` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn stemkit_job_get_result_json(job: Handle, out_json: *mut *mut c_char) -> ErrorCode {
    guard(|| {
        let out = out_ref(out_json, "result output")?;
        *out = into_raw(runtime().job_result(job)?.to_json())?;
        Ok(())
    })
}

/// Blocks until the job's worker has exited
#[no_mangle]
pub extern "C" fn stemkit_job_destroy(job: Handle) -> ErrorCode {
    guard(|| runtime().job_destroy(job))
}

// ─────────────────────────────────────────────────────────────────────────
// Errors and strings
// ─────────────────────────────────────────────────────────────────────────

/// Message of the last failed call on this thread (empty if none)
///
/// The pointer stays valid until the next `stemkit_last_error` call on the
/// same thread. Do not free it.
#[no_mangle]
pub extern "C" fn stemkit_last_error() -> *const c_char {
    last_error_ptr()
}

/// Release a string returned by a `*_get_result_json` call
///
/// # Safety
/// `ptr` must be null or a pointer obtained from this library that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn stemkit_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::ptr;
    use std::thread;
    use std::time::{Duration, Instant};

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn last_error() -> String {
        unsafe { CStr::from_ptr(stemkit_last_error()) }
            .to_string_lossy()
            .into_owned()
    }

    fn write_fixture(path: &std::path::Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..11_025 {
            writer.write_sample(((i % 100) * 50) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_null_arguments_are_invalid() {
        let mut engine = 0;
        let code = unsafe { stemkit_engine_open(ptr::null(), 0, &mut engine) };
        assert_eq!(code, ErrorCode::InvalidArgument);
        assert_eq!(last_error(), "invalid argument: model_path");

        let mut task = 0;
        let code = unsafe { stemkit_prepare_start(0, ptr::null(), &mut task) };
        assert_eq!(code, ErrorCode::InvalidArgument);

        let code = unsafe { stemkit_job_poll(1, ptr::null_mut(), ptr::null_mut(), ptr::null_mut()) };
        assert_eq!(code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_poll_checks_outputs_before_handle() {
        let (mut state, mut progress) = (0, 0.0);
        let code = unsafe { stemkit_prepare_poll(987_654, &mut state, &mut progress, ptr::null_mut()) };
        assert_eq!(code, ErrorCode::InvalidArgument);
        assert_eq!(last_error(), "invalid argument: stage output");

        let mut stage = 0;
        let code = unsafe { stemkit_job_poll(987_654, &mut state, &mut progress, &mut stage) };
        assert_eq!(code, ErrorCode::NotFound);
        assert_eq!(last_error(), "job not found");
    }

    #[test]
    fn test_unknown_handles_are_not_found() {
        assert_eq!(stemkit_job_cancel(987_654), ErrorCode::NotFound);
        assert_eq!(last_error(), "job not found");
        assert_eq!(stemkit_prepare_destroy(987_654), ErrorCode::NotFound);
        assert_eq!(last_error(), "prepare task not found");
        assert_eq!(stemkit_engine_close(987_654), ErrorCode::NotFound);
    }

    #[test]
    fn test_job_without_engine_is_rejected() {
        let out_dir = c("out");
        let input = c("in.wav");
        let config = StemkitJobConfig {
            input_path: input.as_ptr(),
            prepared_input_path: ptr::null(),
            output_dir: out_dir.as_ptr(),
            output_prefix: ptr::null(),
            output_format: 0,
            chunk_size: 0,
            overlap: 0,
        };
        let mut job = 0;
        let code = unsafe { stemkit_job_start(0, &config, &mut job) };
        assert_eq!(code, ErrorCode::NotFound);
        assert_eq!(job, 0);
        assert_eq!(last_error(), "engine not found");
    }

    #[test]
    fn test_missing_model_reports_runtime_error() {
        let path = c("/nonexistent/stemkit/model.onnx");
        let mut engine = 0;
        let code = unsafe { stemkit_engine_open(path.as_ptr(), 1, &mut engine) };
        assert_eq!(code, ErrorCode::Runtime);
        assert!(last_error().starts_with("failed to create engine"), "{}", last_error());
    }

    #[test]
    fn test_prepare_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let input_path = temp.path().join("voice.wav");
        write_fixture(&input_path);
        let work_dir = temp.path().join("work");

        let input = c(input_path.to_str().unwrap());
        let work = c(work_dir.to_str().unwrap());
        let config = StemkitPrepareConfig {
            input_path: input.as_ptr(),
            work_dir: work.as_ptr(),
            output_prefix: ptr::null(),
        };
        let mut task = 0;
        assert_eq!(unsafe { stemkit_prepare_start(0, &config, &mut task) }, ErrorCode::Ok);
        assert_ne!(task, 0);

        let (mut state, mut progress, mut stage) = (0, 0.0, 0);
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let code = unsafe { stemkit_prepare_poll(task, &mut state, &mut progress, &mut stage) };
            assert_eq!(code, ErrorCode::Ok);
            if state >= 2 {
                break;
            }
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(state, 2, "{}", last_error());
        assert_eq!(stage, 4);
        assert_eq!(progress, 1.0);

        let mut json: *mut c_char = ptr::null_mut();
        assert_eq!(unsafe { stemkit_prepare_get_result_json(task, &mut json) }, ErrorCode::Ok);
        let text = unsafe { CStr::from_ptr(json) }.to_str().unwrap().to_string();
        unsafe { stemkit_string_free(json) };

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let expected = work_dir.join("input_canonical_input.wav");
        assert_eq!(value["canonical_input_file"], expected.to_str().unwrap());
        assert_eq!(value["sample_rate"], 44_100);
        assert_eq!(value["channels"], 2);
        assert_eq!(value["duration_ms"], 500);

        assert_eq!(stemkit_prepare_destroy(task), ErrorCode::Ok);
        assert_eq!(stemkit_prepare_cancel(task), ErrorCode::NotFound);
    }

    #[test]
    fn test_string_free_accepts_null() {
        unsafe { stemkit_string_free(ptr::null_mut()) };
    }
}
