//! Codec adapters
//!
//! Decode any Symphonia-supported file to stereo f32, convert its sample
//! rate, and encode stems to WAV, FLAC or MP3. Every entry point takes a
//! progress sink and a cancellation predicate and checks the predicate per
//! packet, chunk or block.

mod decode;
mod encode;
mod resample;

pub use decode::decode_file;
pub use encode::{encode_stem, write_canonical_wav};
pub use resample::resample;

use crate::types::CANONICAL_CHANNELS;

/// Interleaved stereo f32 audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / CANONICAL_CHANNELS as usize
    }

    /// Duration in whole milliseconds, rounded down
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }
}
