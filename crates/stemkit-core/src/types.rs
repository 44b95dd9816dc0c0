//! Shared enums and constants for engines, tasks and stems

use serde::{Deserialize, Serialize};

/// Sample rate of the canonical prepared input (Hz)
pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;

/// Channel count of the canonical prepared input and of every stem buffer
pub const CANONICAL_CHANNELS: u16 = 2;

/// Opaque handle for engines and tasks. 0 is never issued.
pub type Handle = u64;

/// Reserved invalid handle
pub const INVALID_HANDLE: Handle = 0;

/// Inference backend requested when opening an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Cpu,
    Vulkan,
    Cuda,
    Metal,
}

impl BackendPreference {
    /// Convert from the boundary integer code. Unknown codes are treated as Auto.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Cpu,
            2 => Self::Vulkan,
            3 => Self::Cuda,
            4 => Self::Metal,
            _ => Self::Auto,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Auto => 0,
            Self::Cpu => 1,
            Self::Vulkan => 2,
            Self::Cuda => 3,
            Self::Metal => 4,
        }
    }

    /// Parse a lowercase backend name ("auto", "cpu", "vulkan", "cuda", "metal")
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "cpu" => Some(Self::Cpu),
            "vulkan" => Some(Self::Vulkan),
            "cuda" => Some(Self::Cuda),
            "metal" => Some(Self::Metal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Vulkan => "vulkan",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
        }
    }
}

/// Container format for separated stems
///
/// Codes outside the known set are preserved as `Unknown` so the job can be
/// started and fail in the Encode stage with a message naming the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Wav,
    Flac,
    Mp3,
    Unknown(i32),
}

impl OutputFormat {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Wav,
            1 => Self::Flac,
            2 => Self::Mp3,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Wav => 0,
            Self::Flac => 1,
            Self::Mp3 => 2,
            Self::Unknown(code) => code,
        }
    }

    /// File extension for stems. Unknown formats fall back to "wav".
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav | Self::Unknown(_) => "wav",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
        }
    }
}

/// Lifecycle state of a prepare task or separation job
///
/// Transitions only move forward: Pending -> Running -> terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl TaskState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Succeeded,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn code(self) -> i32 {
        self as u8 as i32
    }
}

/// Pipeline stage codes published by a task while it runs
pub trait StageCode: Copy + Send + Sync + std::fmt::Debug + 'static {
    const IDLE: Self;
    fn to_u8(self) -> u8;
    fn from_u8(value: u8) -> Self;
}

/// Stages of a separation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum JobStage {
    Idle = 0,
    Decode = 1,
    Infer = 2,
    Encode = 3,
    Done = 4,
}

impl StageCode for JobStage {
    const IDLE: Self = Self::Idle;

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Decode,
            2 => Self::Infer,
            3 => Self::Encode,
            4 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// Stages of a prepare task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PrepareStage {
    Idle = 0,
    Decode = 1,
    Resample = 2,
    WriteCanonical = 3,
    Done = 4,
}

impl StageCode for PrepareStage {
    const IDLE: Self = Self::Idle;

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Decode,
            2 => Self::Resample,
            3 => Self::WriteCanonical,
            4 => Self::Done,
            _ => Self::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_output_format_keeps_code() {
        let format = OutputFormat::from_code(42);
        assert_eq!(format, OutputFormat::Unknown(42));
        assert_eq!(format.code(), 42);
        assert_eq!(format.extension(), "wav");
    }

    #[test]
    fn test_output_format_extensions() {
        assert_eq!(OutputFormat::from_code(0).extension(), "wav");
        assert_eq!(OutputFormat::from_code(1).extension(), "flac");
        assert_eq!(OutputFormat::from_code(2).extension(), "mp3");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_stage_codes_match_boundary_values() {
        assert_eq!(JobStage::Encode.to_u8(), 3);
        assert_eq!(JobStage::from_u8(2), JobStage::Infer);
        assert_eq!(PrepareStage::WriteCanonical.to_u8(), 3);
        assert_eq!(PrepareStage::from_u8(9), PrepareStage::Idle);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendPreference::from_name("Vulkan"), Some(BackendPreference::Vulkan));
        assert_eq!(BackendPreference::from_name("tpu"), None);
        assert_eq!(BackendPreference::from_code(99), BackendPreference::Auto);
        assert_eq!(BackendPreference::Metal.code(), 4);
    }
}
