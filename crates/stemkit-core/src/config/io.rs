//! Reading and writing the runtime config file

use anyhow::{Context, Result};
use std::path::Path;

use super::RuntimeConfig;

/// LAME bitrates the MP3 writer can be configured with, in kbps
const MP3_BITRATES: [u32; 4] = [128, 192, 256, 320];

impl RuntimeConfig {
    /// Load the config at `path`
    ///
    /// Never fails: a missing file gives the defaults, and an unreadable or
    /// malformed one is logged and also gives the defaults. Values read from
    /// disk are clamped into ranges the engines and encoders accept.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {:?}, using defaults", path);
                return Self::default();
            }
            Err(e) => {
                log::warn!("Cannot read config {:?}: {}, using defaults", path, e);
                return Self::default();
            }
        };

        let mut config = match serde_yaml::from_str::<Self>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Invalid config {:?}: {}, using defaults", path, e);
                return Self::default();
            }
        };
        config.sanitize();
        log::info!("Loaded config {:?}", path);
        config
    }

    /// Write the config as YAML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create config directory {:?}", parent))?;
        }
        let yaml = serde_yaml::to_string(self).context("cannot serialize config")?;
        std::fs::write(path, yaml).with_context(|| format!("cannot write config {:?}", path))?;
        log::info!("Saved config {:?}", path);
        Ok(())
    }

    fn sanitize(&mut self) {
        let before = self.engine.clone();
        self.engine.validate();
        if self.engine != before {
            log::warn!("Engine config clamped from {:?} to {:?}", before, self.engine);
        }

        let requested = self.encode.mp3_bitrate_kbps;
        let bitrate = MP3_BITRATES
            .into_iter()
            .find(|&rate| rate >= requested)
            .unwrap_or(MP3_BITRATES[MP3_BITRATES.len() - 1]);
        if bitrate != requested {
            log::warn!("MP3 bitrate {} kbps rounded to {} kbps", requested, bitrate);
            self.encode.mp3_bitrate_kbps = bitrate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlatformClass;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = RuntimeConfig::load(Path::new("/nonexistent/stemkit/config.yaml"));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_yaml_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "engine: [this is not a map").unwrap();

        assert_eq!(RuntimeConfig::load(&path), RuntimeConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = RuntimeConfig::default();
        config.engine.chunk_size = 131_072;
        config.platform = Some(PlatformClass::Android);
        config.encode.mp3_bitrate_kbps = 192;

        config.save(&path).unwrap();
        assert_eq!(RuntimeConfig::load(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "engine:\n  overlap: 4\n").unwrap();

        let config = RuntimeConfig::load(&path);
        assert_eq!(config.engine.overlap, 4);
        assert_eq!(config.engine.sample_rate, 44_100);
    }

    #[test]
    fn test_loaded_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "engine:\n  chunk_size: 16\n  overlap: 0\nencode:\n  mp3_bitrate_kbps: 200\n",
        )
        .unwrap();

        let config = RuntimeConfig::load(&path);
        assert_eq!(config.engine.chunk_size, 1024);
        assert_eq!(config.engine.overlap, 1);
        assert_eq!(config.encode.mp3_bitrate_kbps, 256);
    }

    #[test]
    fn test_oversized_bitrate_caps_at_320() {
        let mut config = RuntimeConfig::default();
        config.encode.mp3_bitrate_kbps = 999;
        config.sanitize();
        assert_eq!(config.encode.mp3_bitrate_kbps, 320);
    }
}
