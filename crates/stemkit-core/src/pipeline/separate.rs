//! Separation pipeline: decode, infer, encode one file per stem

use std::path::{Path, PathBuf};
use std::time::Instant;

use super::progress::{SEPARATE_DECODE, SEPARATE_ENCODE, SEPARATE_INFER};
use super::{checkpoint, classify, Failure, Publisher};
use crate::codec;
use crate::config::EncodeConfig;
use crate::engine::{EngineContext, InferenceParams};
use crate::service::DEFAULT_SEPARATION_PREFIX;
use crate::types::{JobStage, OutputFormat};

/// Input configuration of a separation job, captured at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparationRequest {
    pub input_path: Option<PathBuf>,
    pub prepared_input_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub output_format: OutputFormat,
    pub chunk_size: Option<i32>,
    pub overlap: Option<i32>,
}

impl SeparationRequest {
    /// File the model reads: the prepared input when present, else the raw input
    pub fn model_input(&self) -> Option<&Path> {
        self.prepared_input_path
            .as_deref()
            .or(self.input_path.as_deref())
    }

    /// Stem file prefix; empty selects `"separated"`
    pub fn stem_prefix(&self) -> &str {
        if self.output_prefix.is_empty() {
            DEFAULT_SEPARATION_PREFIX
        } else {
            &self.output_prefix
        }
    }
}

/// Files a separation job wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparationOutput {
    pub model_input_file: PathBuf,
    /// Prepared input if one was supplied, else the model input
    pub canonical_input_file: PathBuf,
    /// One file per stem, in stem order
    pub files: Vec<PathBuf>,
    pub inference_elapsed_ms: u64,
}

/// `{prefix}_stem_{index}.{ext}`
pub fn stem_file_name(prefix: &str, index: usize, format: OutputFormat) -> String {
    format!("{}_stem_{}.{}", prefix, index, format.extension())
}

/// Run the separation pipeline against `engine`
pub fn run_separation(
    engine: &EngineContext,
    request: &SeparationRequest,
    encode: &EncodeConfig,
    publisher: &dyn Publisher<JobStage>,
) -> Result<SeparationOutput, Failure> {
    let cancel = || publisher.cancel_requested();
    let model_input = request
        .model_input()
        .ok_or_else(|| Failure::Failed("decode failed: no input path".to_string()))?
        .to_path_buf();
    let defaults = engine.defaults();

    // Decode (and convert to the model's rate)
    checkpoint(publisher)?;
    publisher.set_stage(JobStage::Decode);
    publisher.set_progress(SEPARATE_DECODE.start);
    let decode_range = SEPARATE_DECODE.sub(0.0, 0.8);
    let resample_range = SEPARATE_DECODE.sub(0.8, 0.999);
    let audio = codec::decode_file(
        &model_input,
        &|p: f64| publisher.set_progress(decode_range.at(p)),
        &cancel,
    )
    .and_then(|decoded| {
        codec::resample(
            decoded,
            defaults.sample_rate,
            &|p: f64| publisher.set_progress(resample_range.at(p)),
            &cancel,
        )
    })
    .map_err(|e| classify(e, cancel(), "decode failed"))?;

    // Infer
    checkpoint(publisher)?;
    publisher.set_stage(JobStage::Infer);
    publisher.set_progress(SEPARATE_INFER.start);
    let params = InferenceParams::resolve(request.chunk_size, request.overlap, defaults);
    log::info!(
        "Running {} on {} frames (chunk_size={}, overlap={})",
        engine.engine().name(),
        audio.frames(),
        params.chunk_size,
        params.overlap
    );
    let started = Instant::now();
    let stems = engine
        .engine()
        .process(
            &audio.samples,
            params,
            &|p: f64| publisher.set_progress(SEPARATE_INFER.at(p)),
            &cancel,
        )
        .map_err(|e| classify(e, cancel(), "inference failed"))?;
    let inference_elapsed_ms = started.elapsed().as_millis() as u64;

    checkpoint(publisher)?;
    if stems.is_empty() {
        return Err(Failure::Failed("inference produced no stems".to_string()));
    }

    // Encode
    publisher.set_stage(JobStage::Encode);
    publisher.set_progress(SEPARATE_ENCODE.start);
    std::fs::create_dir_all(&request.output_dir)
        .map_err(|e| classify(e.into(), cancel(), "encode failed"))?;

    let mut files = Vec::with_capacity(stems.len());
    for (index, stem) in stems.iter().enumerate() {
        checkpoint(publisher)?;
        let range = SEPARATE_ENCODE.slice(index, stems.len());
        let path = request
            .output_dir
            .join(stem_file_name(request.stem_prefix(), index, request.output_format));
        codec::encode_stem(
            &path,
            stem,
            audio.sample_rate,
            request.output_format,
            encode,
            &|p: f64| publisher.set_progress(range.at(p)),
            &cancel,
        )
        .map_err(|e| classify(e, cancel(), "encode failed"))?;
        log::debug!("Stem {} written to {:?}", index, path);
        files.push(path);
    }

    checkpoint(publisher)?;
    publisher.set_stage(JobStage::Done);
    publisher.set_progress(1.0);

    let canonical_input_file = request
        .prepared_input_path
        .clone()
        .unwrap_or_else(|| model_input.clone());

    Ok(SeparationOutput {
        model_input_file: model_input,
        canonical_input_file,
        files,
        inference_elapsed_ms,
    })
}
