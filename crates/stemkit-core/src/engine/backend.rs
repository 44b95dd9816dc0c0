//! Backend selection policy
//!
//! Maps a requested [`BackendPreference`] and the platform class to the flags
//! an engine must observe at construction time. The result is passed to the
//! engine loader directly; nothing is written to the process environment.

use serde::{Deserialize, Serialize};

use crate::types::BackendPreference;

/// Platform class used by the backend policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformClass {
    /// Linux, Windows, macOS
    Desktop,
    /// Android: Vulkan only, constrained GPU memory
    Android,
    /// iOS: Metal only, constrained GPU memory
    Ios,
}

impl PlatformClass {
    /// Platform class of the build target
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Desktop
        }
    }

    /// Whether a GPU backend exists on this platform class
    fn supports(self, preference: BackendPreference) -> bool {
        match (self, preference) {
            (_, BackendPreference::Cpu) => true,
            (_, BackendPreference::Auto) => true,
            (Self::Desktop, _) => true,
            (Self::Android, BackendPreference::Vulkan) => true,
            (Self::Ios, BackendPreference::Metal) => true,
            _ => false,
        }
    }

    fn is_constrained(self) -> bool {
        !matches!(self, Self::Desktop)
    }
}

/// Flags an engine observes when it is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSettings {
    /// What the caller asked for
    pub requested: BackendPreference,
    /// Run inference on CPU only
    pub force_cpu: bool,
    /// Disable host-visible GPU memory and allow fallback to system memory
    pub gpu_safe_mode: bool,
}

impl BackendSettings {
    /// Resolve the backend flags for a preference on a platform
    pub fn resolve(requested: BackendPreference, platform: PlatformClass) -> Self {
        if requested == BackendPreference::Cpu || !platform.supports(requested) {
            if requested != BackendPreference::Cpu {
                log::warn!(
                    "Backend {} unavailable on {:?}, forcing CPU",
                    requested.name(),
                    platform
                );
            }
            return Self {
                requested,
                force_cpu: true,
                gpu_safe_mode: false,
            };
        }

        Self {
            requested,
            force_cpu: false,
            gpu_safe_mode: platform.is_constrained(),
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        if self.force_cpu {
            "cpu".to_string()
        } else if self.gpu_safe_mode {
            format!("{} (gpu safe mode)", self.requested.name())
        } else {
            self.requested.name().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BackendPreference; 5] = [
        BackendPreference::Auto,
        BackendPreference::Cpu,
        BackendPreference::Vulkan,
        BackendPreference::Cuda,
        BackendPreference::Metal,
    ];

    #[test]
    fn test_cpu_always_forces_cpu() {
        for platform in [PlatformClass::Desktop, PlatformClass::Android, PlatformClass::Ios] {
            let settings = BackendSettings::resolve(BackendPreference::Cpu, platform);
            assert!(settings.force_cpu);
            assert!(!settings.gpu_safe_mode);
        }
    }

    #[test]
    fn test_desktop_gpu_without_safe_mode() {
        for pref in ALL.iter().copied().filter(|p| *p != BackendPreference::Cpu) {
            let settings = BackendSettings::resolve(pref, PlatformClass::Desktop);
            assert!(!settings.force_cpu, "{:?}", pref);
            assert!(!settings.gpu_safe_mode, "{:?}", pref);
        }
    }

    #[test]
    fn test_android_policy() {
        let auto = BackendSettings::resolve(BackendPreference::Auto, PlatformClass::Android);
        assert!(!auto.force_cpu && auto.gpu_safe_mode);

        let vulkan = BackendSettings::resolve(BackendPreference::Vulkan, PlatformClass::Android);
        assert!(!vulkan.force_cpu && vulkan.gpu_safe_mode);

        for pref in [BackendPreference::Cuda, BackendPreference::Metal] {
            let settings = BackendSettings::resolve(pref, PlatformClass::Android);
            assert!(settings.force_cpu);
            assert!(!settings.gpu_safe_mode);
        }
    }

    #[test]
    fn test_ios_policy() {
        let metal = BackendSettings::resolve(BackendPreference::Metal, PlatformClass::Ios);
        assert!(!metal.force_cpu && metal.gpu_safe_mode);

        for pref in [BackendPreference::Vulkan, BackendPreference::Cuda] {
            assert!(BackendSettings::resolve(pref, PlatformClass::Ios).force_cpu);
        }
    }

    #[test]
    fn test_describe() {
        let settings = BackendSettings::resolve(BackendPreference::Vulkan, PlatformClass::Android);
        assert_eq!(settings.describe(), "vulkan (gpu safe mode)");
        assert_eq!(
            BackendSettings::resolve(BackendPreference::Cpu, PlatformClass::Desktop).describe(),
            "cpu"
        );
    }
}
