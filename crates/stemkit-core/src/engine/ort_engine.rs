//! ONNX Runtime engine
//!
//! Runs a stem separation model exported with a single `input` tensor of
//! shape `[1, 2, chunk]` and a first output of shape `[1, stems, 2, chunk]`.
//! Long inputs are processed window by window and recombined with
//! overlap-add under a linear crossfade.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array3;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::backend::BackendSettings;
use super::{EngineDefaults, InferenceEngine, InferenceParams};
use crate::config::EngineConfig;
use crate::error::StageError;
use crate::hooks::{CancelCheck, ProgressSink};

/// Engine backed by an `ort` session
///
/// `Session::run` needs `&mut self`, so the session sits behind a mutex;
/// tasks sharing one engine take turns per window.
pub struct OrtEngine {
    session: Mutex<Session>,
    defaults: EngineDefaults,
}

impl OrtEngine {
    /// Load a model with the given backend flags
    pub fn load(
        model_path: &Path,
        backend: &BackendSettings,
        config: &EngineConfig,
    ) -> Result<Self, String> {
        if !model_path.exists() {
            return Err(format!("model not found: {:?}", model_path));
        }

        log::info!(
            "Loading ONNX model from {:?} (backend: {})",
            model_path,
            backend.describe()
        );

        let intra_threads = config.intra_threads;
        let force_cpu = backend.force_cpu;
        let safe_mode = backend.gpu_safe_mode;

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| {
                if intra_threads > 0 {
                    b.with_intra_threads(intra_threads)
                } else {
                    Ok(b)
                }
            })
            // Safe mode avoids preallocated arenas on constrained GPUs
            .and_then(|b| b.with_memory_pattern(!safe_mode))
            .and_then(|b| {
                if force_cpu {
                    b.with_execution_providers([CPUExecutionProvider::default().build()])
                } else {
                    Self::with_gpu_providers(b)
                }
            })
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| format!("Failed to load ONNX model: {}", e))?;

        Ok(Self {
            session: Mutex::new(session),
            defaults: EngineDefaults {
                chunk_size: config.chunk_size,
                overlap: config.overlap,
                sample_rate: config.sample_rate,
            },
        })
    }

    #[cfg(feature = "cuda")]
    fn with_gpu_providers(
        builder: ort::session::builder::SessionBuilder,
    ) -> ort::Result<ort::session::builder::SessionBuilder> {
        use ort::execution_providers::CUDAExecutionProvider;
        builder.with_execution_providers([
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ])
    }

    #[cfg(not(feature = "cuda"))]
    fn with_gpu_providers(
        builder: ort::session::builder::SessionBuilder,
    ) -> ort::Result<ort::session::builder::SessionBuilder> {
        // Let ONNX Runtime pick from whatever providers the build ships
        Ok(builder)
    }

    /// Run one window through the model
    ///
    /// Returns one planar `[2 * chunk]` buffer (left then right) per stem.
    fn run_window(&self, window: Array3<f32>) -> Result<Vec<Vec<f32>>, StageError> {
        let input = Tensor::from_array(window)
            .map_err(|e| StageError::failed(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        let outputs = session
            .run(ort::inputs!["input" => input])
            .map_err(|e| StageError::failed(format!("Inference failed: {}", e)))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| StageError::failed("No output tensor"))?
            .1;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| StageError::failed(format!("Failed to extract output: {}", e)))?;

        let shape: Vec<i64> = shape.iter().copied().collect();
        if shape.len() != 4 || shape[2] != 2 {
            return Err(StageError::failed(format!(
                "Unexpected output shape: {:?}, expected [1, stems, 2, N]",
                shape
            )));
        }

        let stems = shape[1] as usize;
        let stem_len = 2 * shape[3] as usize;
        Ok((0..stems)
            .map(|s| data[s * stem_len..(s + 1) * stem_len].to_vec())
            .collect())
    }
}

impl InferenceEngine for OrtEngine {
    fn defaults(&self) -> EngineDefaults {
        self.defaults
    }

    fn process(
        &self,
        input: &[f32],
        params: InferenceParams,
        progress: ProgressSink<'_>,
        should_cancel: CancelCheck<'_>,
    ) -> Result<Vec<Vec<f32>>, StageError> {
        let frames = input.len() / 2;
        let chunk = params.chunk_size.max(1) as usize;
        let hop = (chunk / params.overlap.max(1) as usize).max(1);
        let fade = chunk - hop;

        if frames == 0 {
            return Ok(Vec::new());
        }

        let starts: Vec<usize> = (0..frames).step_by(hop).collect();
        log::info!(
            "Running inference on {} frames: {} windows of {} (hop {})",
            frames,
            starts.len(),
            chunk,
            hop
        );

        let mut stems: Vec<Vec<f32>> = Vec::new();
        let mut weights = vec![0.0f32; frames];

        for (index, &start) in starts.iter().enumerate() {
            if should_cancel() {
                return Err(StageError::Cancelled);
            }

            let valid = chunk.min(frames - start);
            let mut window = Array3::<f32>::zeros((1, 2, chunk));
            for i in 0..valid {
                let frame = start + i;
                window[[0, 0, i]] = input[frame * 2];
                window[[0, 1, i]] = input[frame * 2 + 1];
            }

            let outputs = self.run_window(window)?;
            if stems.is_empty() {
                stems = vec![vec![0.0f32; frames * 2]; outputs.len()];
            }

            for i in 0..valid {
                let w = crossfade_weight(i, chunk, fade);
                weights[start + i] += w;
                for (stem, planar) in stems.iter_mut().zip(&outputs) {
                    let n = planar.len() / 2;
                    if i >= n {
                        continue;
                    }
                    stem[(start + i) * 2] += planar[i] * w;
                    stem[(start + i) * 2 + 1] += planar[n + i] * w;
                }
            }

            progress((index + 1) as f64 / starts.len() as f64);
        }

        for stem in &mut stems {
            for (frame, w) in weights.iter().enumerate() {
                if *w > 0.0 {
                    stem[frame * 2] /= w;
                    stem[frame * 2 + 1] /= w;
                }
            }
        }

        log::info!("Inference produced {} stems", stems.len());
        Ok(stems)
    }

    fn name(&self) -> &'static str {
        "ONNX Runtime"
    }
}

/// Linear fade-in/fade-out weight for position `i` of a window
///
/// Never zero, so every covered frame has a positive weight sum.
fn crossfade_weight(i: usize, chunk: usize, fade: usize) -> f32 {
    if fade == 0 {
        return 1.0;
    }
    let ramp = (fade + 1) as f32;
    let rise = (i + 1) as f32 / ramp;
    let fall = (chunk - i) as f32 / ramp;
    rise.min(fall).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfade_flat_without_overlap() {
        for i in 0..8 {
            assert_eq!(crossfade_weight(i, 8, 0), 1.0);
        }
    }

    #[test]
    fn test_crossfade_ramps() {
        let w: Vec<f32> = (0..8).map(|i| crossfade_weight(i, 8, 3)).collect();
        assert!(w[0] > 0.0 && w[0] < w[1]);
        assert_eq!(w[4], 1.0);
        assert!(w[7] > 0.0 && w[7] < w[6]);
    }

    #[test]
    fn test_load_missing_model() {
        let settings = BackendSettings::resolve(
            crate::types::BackendPreference::Cpu,
            super::super::PlatformClass::Desktop,
        );
        let err = OrtEngine::load(Path::new("/nonexistent/model.onnx"), &settings, &EngineConfig::default())
            .err()
            .unwrap();
        assert!(err.contains("model not found"));
    }
}
