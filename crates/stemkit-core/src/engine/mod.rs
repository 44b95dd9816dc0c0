//! Inference engines and their registry
//!
//! The `InferenceEngine` trait abstracts over stem separation models so the
//! pipeline never depends on a particular runtime. Engines are built by an
//! [`EngineLoader`] and owned by the [`EngineRegistry`], which hands out
//! opaque integer handles.
//!
//! ## Available Engines
//!
//! - **OrtEngine** (`onnx` feature): ONNX Runtime via the `ort` crate,
//!   chunked overlap-add inference over stereo input.
//!
//! Hosts and tests can plug in their own engine by implementing
//! [`EngineLoader`].

mod backend;
#[cfg(feature = "onnx")]
mod ort_engine;
mod registry;

use std::path::Path;

pub use backend::{BackendSettings, PlatformClass};
#[cfg(feature = "onnx")]
pub use ort_engine::OrtEngine;
pub use registry::{EngineContext, EngineRegistry};

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::hooks::{CancelCheck, ProgressSink};

/// Default processing parameters reported by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineDefaults {
    /// Samples per channel per inference window
    pub chunk_size: u32,
    /// Number of overlapping windows per chunk
    pub overlap: u32,
    /// Sample rate the model expects its input at
    pub sample_rate: u32,
}

/// Parameters for a single `process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceParams {
    pub chunk_size: u32,
    pub overlap: u32,
}

impl InferenceParams {
    /// Use the requested values, falling back to engine defaults for
    /// missing or non-positive ones
    pub fn resolve(chunk_size: Option<i32>, overlap: Option<i32>, defaults: EngineDefaults) -> Self {
        let pick = |requested: Option<i32>, fallback: u32| match requested {
            Some(value) if value > 0 => value as u32,
            _ => fallback,
        };
        Self {
            chunk_size: pick(chunk_size, defaults.chunk_size),
            overlap: pick(overlap, defaults.overlap),
        }
    }
}

/// Trait for stem separation engines
///
/// Engines are shared read-only by every task bound to them, so `process`
/// takes `&self`. Implementations must sample `should_cancel` at bounded
/// intervals (per inference window) and return `StageError::Cancelled` when
/// it reports true; the cancellation latency of a task is the longest gap
/// between two such checks.
pub trait InferenceEngine: Send + Sync {
    /// Default chunk size, overlap and model sample rate
    fn defaults(&self) -> EngineDefaults;

    /// Separate interleaved stereo audio into stems
    ///
    /// # Arguments
    /// * `input` - Interleaved stereo f32 samples at `defaults().sample_rate`
    /// * `params` - Chunk size and overlap to use
    /// * `progress` - Sink for progress in 0.0..=1.0
    /// * `should_cancel` - Cancellation predicate
    ///
    /// # Returns
    /// One interleaved stereo buffer per stem, in model stem order
    fn process(
        &self,
        input: &[f32],
        params: InferenceParams,
        progress: ProgressSink<'_>,
        should_cancel: CancelCheck<'_>,
    ) -> Result<Vec<Vec<f32>>, StageError>;

    /// Engine name for logging
    fn name(&self) -> &'static str;
}

/// Builds engines for the registry
///
/// Backend flags are passed in explicitly and must be applied before the
/// underlying runtime creates its device context.
pub trait EngineLoader: Send + Sync {
    fn load(
        &self,
        model_path: &Path,
        backend: &BackendSettings,
    ) -> Result<Box<dyn InferenceEngine>, String>;
}

impl<F> EngineLoader for F
where
    F: Fn(&Path, &BackendSettings) -> Result<Box<dyn InferenceEngine>, String> + Send + Sync,
{
    fn load(
        &self,
        model_path: &Path,
        backend: &BackendSettings,
    ) -> Result<Box<dyn InferenceEngine>, String> {
        self(model_path, backend)
    }
}

/// Loader for the engine compiled into this build
///
/// With the `onnx` feature this builds an [`OrtEngine`]; otherwise every
/// load fails with a message explaining how to enable it.
pub struct DefaultLoader {
    config: EngineConfig,
}

impl DefaultLoader {
    pub fn new(mut config: EngineConfig) -> Self {
        config.validate();
        Self { config }
    }
}

impl EngineLoader for DefaultLoader {
    #[cfg(feature = "onnx")]
    fn load(
        &self,
        model_path: &Path,
        backend: &BackendSettings,
    ) -> Result<Box<dyn InferenceEngine>, String> {
        let engine = OrtEngine::load(model_path, backend, &self.config)?;
        Ok(Box::new(engine))
    }

    #[cfg(not(feature = "onnx"))]
    fn load(
        &self,
        model_path: &Path,
        _backend: &BackendSettings,
    ) -> Result<Box<dyn InferenceEngine>, String> {
        log::warn!(
            "Cannot load {:?} (chunk_size={}): no inference runtime compiled in",
            model_path,
            self.config.chunk_size
        );
        Err("no inference runtime available: rebuild with the `onnx` feature".to_string())
    }
}
