//! Prepare pipeline: decode, resample and write the canonical input

use std::path::{Path, PathBuf};

use super::progress::{PREPARE_DECODE, PREPARE_RESAMPLE, PREPARE_WRITE};
use super::{checkpoint, classify, Failure, Publisher};
use crate::codec::{self, DecodedAudio};
use crate::engine::EngineContext;
use crate::types::{PrepareStage, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE};

/// Input configuration of a prepare task, captured at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    pub input_path: PathBuf,
    pub work_dir: PathBuf,
    pub output_prefix: String,
}

/// Metadata of the canonical file a prepare task wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOutput {
    pub canonical_input_file: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// `{prefix}_canonical_input.wav`, or `canonical_input.wav` without a prefix
pub fn canonical_file_name(prefix: &str) -> String {
    if prefix.is_empty() {
        "canonical_input.wav".to_string()
    } else {
        format!("{}_canonical_input.wav", prefix)
    }
}

/// Run the prepare pipeline
///
/// The engine, when given, only pins the context for the task's lifetime.
pub fn run_prepare(
    engine: Option<&EngineContext>,
    request: &PrepareRequest,
    publisher: &dyn Publisher<PrepareStage>,
) -> Result<PrepareOutput, Failure> {
    let cancel = || publisher.cancel_requested();

    if let Some(engine) = engine {
        log::debug!("Prepare bound to engine {}", engine.handle());
    }

    // Decode
    checkpoint(publisher)?;
    publisher.set_stage(PrepareStage::Decode);
    publisher.set_progress(PREPARE_DECODE.start);
    let decoded = codec::decode_file(
        &request.input_path,
        &|p: f64| publisher.set_progress(PREPARE_DECODE.at(p) * 0.999),
        &cancel,
    )
    .map_err(|e| classify(e, cancel(), "prepare decode failed"))?;

    // Resample
    checkpoint(publisher)?;
    publisher.set_stage(PrepareStage::Resample);
    publisher.set_progress(PREPARE_RESAMPLE);
    let canonical = codec::resample(decoded, CANONICAL_SAMPLE_RATE, &|_: f64| {}, &cancel)
        .map_err(|e| classify(e, cancel(), "prepare decode failed"))?;

    // Write canonical
    checkpoint(publisher)?;
    publisher.set_stage(PrepareStage::WriteCanonical);
    publisher.set_progress(PREPARE_WRITE.start);
    let path = write_canonical(&request.work_dir, &request.output_prefix, &canonical, publisher)?;

    checkpoint(publisher)?;
    publisher.set_stage(PrepareStage::Done);
    publisher.set_progress(1.0);

    Ok(PrepareOutput {
        canonical_input_file: path,
        sample_rate: CANONICAL_SAMPLE_RATE,
        channels: CANONICAL_CHANNELS,
        duration_ms: canonical.duration_ms(),
    })
}

fn write_canonical(
    work_dir: &Path,
    prefix: &str,
    audio: &DecodedAudio,
    publisher: &dyn Publisher<PrepareStage>,
) -> Result<PathBuf, Failure> {
    let cancel = || publisher.cancel_requested();

    std::fs::create_dir_all(work_dir)
        .map_err(|e| classify(e.into(), cancel(), "prepare write failed"))?;

    let path = work_dir.join(canonical_file_name(prefix));
    codec::write_canonical_wav(
        &path,
        audio,
        &|p: f64| publisher.set_progress(PREPARE_WRITE.at(p)),
        &cancel,
    )
    .map_err(|e| classify(e, cancel(), "prepare write failed"))?;

    log::info!("Canonical input written to {:?}", path);
    Ok(path)
}
