//! Audio decoding (Symphonia)

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::DecodedAudio;
use crate::error::StageError;
use crate::hooks::{CancelCheck, ProgressSink};

/// Decode an audio file to interleaved stereo f32 at its native sample rate
///
/// Mono is duplicated to both channels; files with more than two channels
/// keep their first two. Cancellation is checked once per packet.
pub fn decode_file(
    path: &Path,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<DecodedAudio, StageError> {
    let file = File::open(path)
        .map_err(|e| StageError::failed(format!("cannot open {:?}: {}", path, e)))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| StageError::failed(format!("unsupported input {:?}: {}", path, e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| StageError::failed("no audio track found"))?;

    let track_id = track.id;
    let total_frames = track.codec_params.n_frames;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| StageError::failed("unknown sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| StageError::failed(format!("no decoder: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut source_channels = channels;

    loop {
        if should_cancel() {
            return Err(StageError::Cancelled);
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Error decoding packet: {}", e);
                continue;
            }
            Err(e) => return Err(StageError::failed(format!("decode error: {}", e))),
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            source_channels = spec.channels.count();
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }

        if let Some(total) = total_frames.filter(|t| *t > 0) {
            progress((packet.ts() as f64 / total as f64).min(1.0));
        }
    }

    if samples.is_empty() {
        return Err(StageError::failed(format!("no audio decoded from {:?}", path)));
    }

    progress(1.0);

    let stereo = to_stereo(&samples, source_channels);
    log::debug!(
        "Decoded {:?}: {} frames at {}Hz from {} channels",
        path,
        stereo.len() / 2,
        sample_rate,
        source_channels
    );

    Ok(DecodedAudio {
        samples: stereo,
        sample_rate,
    })
}

/// Map interleaved audio with any channel count to interleaved stereo
pub(crate) fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}
