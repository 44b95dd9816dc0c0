//! Result payloads returned for succeeded tasks
//!
//! Pure conversions from pipeline outputs to the JSON documents handed to
//! callers. Paths are rendered lossily; field order is not significant.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::{PrepareOutput, SeparationOutput};

/// Payload of a succeeded prepare task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResult {
    pub canonical_input_file: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// Payload of a succeeded separation job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationResult {
    pub model_input_file: String,
    pub canonical_input_file: String,
    pub files: Vec<String>,
    pub inference_elapsed_ms: u64,
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl From<&PrepareOutput> for PrepareResult {
    fn from(output: &PrepareOutput) -> Self {
        Self {
            canonical_input_file: display(&output.canonical_input_file),
            sample_rate: output.sample_rate,
            channels: output.channels,
            duration_ms: output.duration_ms,
        }
    }
}

impl From<&SeparationOutput> for SeparationResult {
    fn from(output: &SeparationOutput) -> Self {
        Self {
            model_input_file: display(&output.model_input_file),
            canonical_input_file: display(&output.canonical_input_file),
            files: output.files.iter().map(|p| display(p)).collect(),
            inference_elapsed_ms: output.inference_elapsed_ms,
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    // Plain strings and integers always serialize
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

impl PrepareResult {
    /// Render as a JSON object
    pub fn to_json(&self) -> String {
        to_json(self)
    }
}

impl SeparationResult {
    pub fn to_json(&self) -> String {
        to_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_prepare_schema() {
        let output = PrepareOutput {
            canonical_input_file: PathBuf::from("/work/song_canonical_input.wav"),
            sample_rate: 44_100,
            channels: 2,
            duration_ms: 2500,
        };
        let json: serde_json::Value =
            serde_json::from_str(&PrepareResult::from(&output).to_json()).unwrap();

        assert_eq!(json["canonical_input_file"], "/work/song_canonical_input.wav");
        assert_eq!(json["sample_rate"], 44_100);
        assert_eq!(json["channels"], 2);
        assert_eq!(json["duration_ms"], 2500);
        assert_eq!(json.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_separation_schema() {
        let output = SeparationOutput {
            model_input_file: PathBuf::from("in.wav"),
            canonical_input_file: PathBuf::from("in.wav"),
            files: vec![PathBuf::from("out/mix_stem_0.wav"), PathBuf::from("out/mix_stem_1.wav")],
            inference_elapsed_ms: 12,
        };
        let result = SeparationResult::from(&output);
        let json: serde_json::Value = serde_json::from_str(&result.to_json()).unwrap();

        assert_eq!(json["model_input_file"], json["canonical_input_file"]);
        assert_eq!(json["files"][0], "out/mix_stem_0.wav");
        assert_eq!(json["files"][1], "out/mix_stem_1.wav");
        assert_eq!(json["inference_elapsed_ms"], 12);

        let parsed: SeparationResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, result);
    }
}
