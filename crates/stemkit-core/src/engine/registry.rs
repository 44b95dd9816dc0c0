//! Engine registry - owns loaded engines behind opaque handles

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backend::{BackendSettings, PlatformClass};
use super::{EngineDefaults, EngineLoader, InferenceEngine};
use crate::error::{Result, StemkitError};
use crate::handle::HandleTable;
use crate::types::{BackendPreference, Handle, INVALID_HANDLE};

/// A loaded engine plus the settings it was opened with
///
/// Shared read-only by every task bound to it. Closing the registry entry
/// does not drop the engine while a task still holds an `Arc` to it.
pub struct EngineContext {
    handle: Handle,
    backend: BackendSettings,
    model_path: PathBuf,
    engine: Box<dyn InferenceEngine>,
}

impl EngineContext {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    pub fn defaults(&self) -> EngineDefaults {
        self.engine.defaults()
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("handle", &self.handle)
            .field("backend", &self.backend)
            .field("model_path", &self.model_path)
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Registry of open engines
pub struct EngineRegistry {
    loader: Box<dyn EngineLoader>,
    platform: PlatformClass,
    engines: HandleTable<EngineContext>,
}

impl EngineRegistry {
    /// Create a registry that builds engines with `loader`
    pub fn new(loader: impl EngineLoader + 'static, platform: PlatformClass) -> Self {
        Self {
            loader: Box::new(loader),
            platform,
            engines: HandleTable::new(),
        }
    }

    pub fn platform(&self) -> PlatformClass {
        self.platform
    }

    /// Load an engine and register it
    ///
    /// The backend flags are resolved first and passed to the loader, so the
    /// engine sees them at construction. The registry lock is not held while
    /// the model loads.
    pub fn open(&self, model_path: impl AsRef<Path>, preference: BackendPreference) -> Result<Handle> {
        let model_path = model_path.as_ref();
        if model_path.as_os_str().is_empty() {
            return Err(StemkitError::InvalidArgument("model_path".to_string()));
        }

        let backend = BackendSettings::resolve(preference, self.platform);
        log::info!("Opening engine {:?} with backend {}", model_path, backend.describe());

        let engine = self
            .loader
            .load(model_path, &backend)
            .map_err(|e| StemkitError::Runtime(format!("failed to create engine: {}", e)))?;

        let model_path = model_path.to_path_buf();
        let (handle, context) = self.engines.insert_with(move |handle| {
            Arc::new(EngineContext {
                handle,
                backend,
                model_path,
                engine,
            })
        });

        log::info!("Engine {} ready ({})", handle, context.engine().name());
        Ok(handle)
    }

    /// Look up an engine. Absence is not an error at this level.
    pub fn find(&self, handle: Handle) -> Option<Arc<EngineContext>> {
        self.engines.get(handle)
    }

    /// Remove an engine from the registry
    ///
    /// Does not wait for tasks using it; they keep their own reference.
    pub fn close(&self, handle: Handle) -> Result<()> {
        if handle == INVALID_HANDLE {
            return Err(StemkitError::InvalidArgument("engine handle".to_string()));
        }

        let context = self
            .engines
            .remove(handle)
            .ok_or_else(|| StemkitError::NotFound("engine".to_string()))?;

        log::info!(
            "Engine {} closed ({} other references still alive)",
            handle,
            Arc::strong_count(&context) - 1
        );
        Ok(())
    }

    /// Default chunk size, overlap and sample rate of an engine
    pub fn defaults(&self, handle: Handle) -> Result<EngineDefaults> {
        self.find(handle)
            .map(|context| context.defaults())
            .ok_or_else(|| StemkitError::NotFound("engine".to_string()))
    }

    /// Number of open engines
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::hooks::{CancelCheck, ProgressSink};
    use crate::engine::InferenceParams;
    use std::sync::Mutex;

    struct FixedEngine;

    impl InferenceEngine for FixedEngine {
        fn defaults(&self) -> EngineDefaults {
            EngineDefaults {
                chunk_size: 1024,
                overlap: 4,
                sample_rate: 48_000,
            }
        }

        fn process(
            &self,
            input: &[f32],
            _params: InferenceParams,
            _progress: ProgressSink<'_>,
            _should_cancel: CancelCheck<'_>,
        ) -> std::result::Result<Vec<Vec<f32>>, StageError> {
            Ok(vec![input.to_vec()])
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    /// Records the backend settings each load saw
    #[derive(Default)]
    struct RecordingLoader {
        seen: Arc<Mutex<Vec<BackendSettings>>>,
        fail: bool,
    }

    impl EngineLoader for RecordingLoader {
        fn load(
            &self,
            _model_path: &Path,
            backend: &BackendSettings,
        ) -> std::result::Result<Box<dyn InferenceEngine>, String> {
            self.seen.lock().unwrap().push(*backend);
            if self.fail {
                return Err("corrupt model".to_string());
            }
            Ok(Box::new(FixedEngine))
        }
    }

    #[test]
    fn test_open_rejects_empty_path() {
        let registry = EngineRegistry::new(RecordingLoader::default(), PlatformClass::Desktop);
        let err = registry.open("", BackendPreference::Auto).unwrap_err();
        assert!(matches!(err, StemkitError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_and_defaults() {
        let registry = EngineRegistry::new(RecordingLoader::default(), PlatformClass::Desktop);
        let handle = registry.open("model.onnx", BackendPreference::Cpu).unwrap();
        assert_eq!(handle, 1);

        let defaults = registry.defaults(handle).unwrap();
        assert_eq!(defaults.chunk_size, 1024);
        assert_eq!(defaults.overlap, 4);
        assert_eq!(defaults.sample_rate, 48_000);
    }

    #[test]
    fn test_backend_flags_reach_loader() {
        let loader = RecordingLoader::default();
        let seen = Arc::clone(&loader.seen);
        let registry = EngineRegistry::new(loader, PlatformClass::Android);

        registry.open("a.onnx", BackendPreference::Cpu).unwrap();
        registry.open("b.onnx", BackendPreference::Vulkan).unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[0].force_cpu);
        assert!(!seen[1].force_cpu);
        assert!(seen[1].gpu_safe_mode);
    }

    #[test]
    fn test_loader_failure_is_runtime_error() {
        let loader = RecordingLoader {
            fail: true,
            ..Default::default()
        };
        let registry = EngineRegistry::new(loader, PlatformClass::Desktop);
        let err = registry.open("model.onnx", BackendPreference::Auto).unwrap_err();
        assert_eq!(err, StemkitError::Runtime("failed to create engine: corrupt model".into()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_semantics() {
        let registry = EngineRegistry::new(RecordingLoader::default(), PlatformClass::Desktop);
        let handle = registry.open("model.onnx", BackendPreference::Auto).unwrap();

        assert!(matches!(registry.close(0), Err(StemkitError::InvalidArgument(_))));
        assert!(matches!(registry.close(handle + 10), Err(StemkitError::NotFound(_))));

        registry.close(handle).unwrap();
        assert!(matches!(registry.defaults(handle), Err(StemkitError::NotFound(_))));
        assert!(matches!(registry.close(handle), Err(StemkitError::NotFound(_))));
    }

    #[test]
    fn test_context_outlives_close() {
        let registry = EngineRegistry::new(RecordingLoader::default(), PlatformClass::Desktop);
        let handle = registry.open("model.onnx", BackendPreference::Auto).unwrap();

        let held = registry.find(handle).unwrap();
        registry.close(handle).unwrap();

        assert!(registry.find(handle).is_none());
        assert_eq!(held.defaults().sample_rate, 48_000);
        assert_eq!(held.model_path(), Path::new("model.onnx"));
    }
}
