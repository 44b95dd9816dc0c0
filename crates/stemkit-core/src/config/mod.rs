//! Runtime configuration
//!
//! ```ignore
//! use stemkit_core::config::{resolve_config_path, RuntimeConfig};
//!
//! let config = RuntimeConfig::load(&resolve_config_path());
//! ```

mod io;
mod paths;

pub use paths::{default_config_path, resolve_config_path, CONFIG_ENV_VAR};

use serde::{Deserialize, Serialize};

use crate::engine::PlatformClass;
use crate::types::CANONICAL_SAMPLE_RATE;

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Parameters handed to engines built by the loader
    pub engine: EngineConfig,

    /// Override of the detected platform class for backend selection
    pub platform: Option<PlatformClass>,

    /// Encoder options
    pub encode: EncodeConfig,
}

/// Defaults for inference engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples per channel per inference window
    pub chunk_size: u32,
    /// Number of overlapping windows per chunk
    pub overlap: u32,
    /// Sample rate the model expects
    pub sample_rate: u32,
    /// Intra-op threads for CPU inference (0 = runtime default)
    pub intra_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 352_800, // 8 seconds at 44.1kHz
            overlap: 2,
            sample_rate: CANONICAL_SAMPLE_RATE,
            intra_threads: 0,
        }
    }
}

impl EngineConfig {
    /// Clamp values into ranges every engine accepts
    pub fn validate(&mut self) {
        self.chunk_size = self.chunk_size.max(1024);
        self.overlap = self.overlap.clamp(1, 16);
        if self.sample_rate == 0 {
            self.sample_rate = CANONICAL_SAMPLE_RATE;
        }
    }
}

/// Encoder options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// MP3 bitrate in kbps (only used with the `mp3` feature)
    pub mp3_bitrate_kbps: u32,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self { mp3_bitrate_kbps: 320 }
    }
}
