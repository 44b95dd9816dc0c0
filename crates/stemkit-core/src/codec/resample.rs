//! Sample rate conversion (rubato)

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::DecodedAudio;
use crate::error::StageError;
use crate::hooks::{CancelCheck, ProgressSink};

/// Frames fed to the resampler per call
const CHUNK_FRAMES: usize = 8192;

/// Resample interleaved stereo audio to `to_rate`
///
/// Processes fixed-size chunks, checking cancellation and reporting progress
/// after each one. The output is compensated for the filter delay and holds
/// exactly `ceil(frames * to_rate / from_rate)` frames.
pub fn resample(
    audio: DecodedAudio,
    to_rate: u32,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<DecodedAudio, StageError> {
    let from_rate = audio.sample_rate;
    if from_rate == to_rate || audio.samples.is_empty() {
        progress(1.0);
        return Ok(DecodedAudio {
            samples: audio.samples,
            sample_rate: to_rate,
        });
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(StageError::failed(format!(
            "invalid resample {} -> {}",
            from_rate, to_rate
        )));
    }

    let frames = audio.frames();
    let target_frames = (frames as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;

    let (left, right): (Vec<f32>, Vec<f32>) = audio
        .samples
        .chunks_exact(2)
        .map(|frame| (frame[0], frame[1]))
        .unzip();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, 2)
        .map_err(|e| StageError::failed(format!("Resampler error: {}", e)))?;

    let delay = resampler.output_delay();
    let wanted = delay + target_frames;
    let mut out: [Vec<f32>; 2] = [
        Vec::with_capacity(wanted + CHUNK_FRAMES),
        Vec::with_capacity(wanted + CHUNK_FRAMES),
    ];

    let mut pos = 0;
    while frames - pos >= resampler.input_frames_next() {
        if should_cancel() {
            return Err(StageError::Cancelled);
        }
        let n = resampler.input_frames_next();
        let wave_in: [&[f32]; 2] = [&left[pos..pos + n], &right[pos..pos + n]];
        let chunk = resampler
            .process(&wave_in[..], None)
            .map_err(|e| StageError::failed(format!("Resample failed: {}", e)))?;
        append(&mut out, chunk);
        pos += n;
        progress(pos as f64 / frames as f64);
    }

    if pos < frames {
        let wave_in: [&[f32]; 2] = [&left[pos..], &right[pos..]];
        let chunk = resampler
            .process_partial(Some(&wave_in[..]), None)
            .map_err(|e| StageError::failed(format!("Resample failed: {}", e)))?;
        append(&mut out, chunk);
    }

    // Flush the filter tail until the delayed output covers every frame
    while out[0].len() < wanted {
        if should_cancel() {
            return Err(StageError::Cancelled);
        }
        let chunk = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| StageError::failed(format!("Resample failed: {}", e)))?;
        if chunk.first().map_or(true, |c| c.is_empty()) {
            break;
        }
        append(&mut out, chunk);
    }

    let [left, right] = out;
    let end = wanted.min(left.len());
    let start = delay.min(end);
    let mut samples = Vec::with_capacity(target_frames * 2);
    for i in start..end {
        samples.push(left[i]);
        samples.push(right[i]);
    }
    samples.resize(target_frames * 2, 0.0);

    progress(1.0);
    log::debug!(
        "Resampled {} frames {}Hz -> {} frames {}Hz",
        frames,
        from_rate,
        target_frames,
        to_rate
    );

    Ok(DecodedAudio {
        samples,
        sample_rate: to_rate,
    })
}

fn append(out: &mut [Vec<f32>; 2], chunk: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(chunk) {
        dst.extend_from_slice(&src);
    }
}
