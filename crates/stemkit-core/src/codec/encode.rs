//! Container encoding: WAV (hound), FLAC (flacenc), MP3 (mp3lame-encoder)

use std::path::Path;

use flacenc::source::{Fill, Source};
use hound::{SampleFormat, WavSpec, WavWriter};

use super::DecodedAudio;
use crate::config::EncodeConfig;
use crate::error::StageError;
use crate::hooks::{CancelCheck, ProgressSink};
use crate::types::{OutputFormat, CANONICAL_CHANNELS};

/// Frames written between cancellation checks
const BLOCK_FRAMES: usize = 4096;

/// FLAC output bit depth
const FLAC_BITS: usize = 24;

fn wav_error(e: hound::Error) -> StageError {
    StageError::failed(format!("WAV write failed: {}", e))
}

/// Encode one interleaved stereo stem to `path` in `format`
pub fn encode_stem(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    format: OutputFormat,
    options: &EncodeConfig,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<(), StageError> {
    match format {
        OutputFormat::Wav => write_wav_f32(path, samples, sample_rate, progress, should_cancel),
        OutputFormat::Flac => write_flac(path, samples, sample_rate, progress, should_cancel),
        OutputFormat::Mp3 => write_mp3(
            path,
            samples,
            sample_rate,
            options.mp3_bitrate_kbps,
            progress,
            should_cancel,
        ),
        OutputFormat::Unknown(code) => Err(StageError::Unsupported(format!(
            "unsupported output format: {}",
            code
        ))),
    }
}

/// Write the canonical prepared input as 16-bit PCM WAV
pub fn write_canonical_wav(
    path: &Path,
    audio: &DecodedAudio,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<(), StageError> {
    let spec = WavSpec {
        channels: CANONICAL_CHANNELS,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_error)?;
    write_blocks(&audio.samples, progress, should_cancel, |block| {
        for &sample in block {
            writer.write_sample(to_i16(sample)).map_err(wav_error)?;
        }
        Ok(())
    })?;
    writer.finalize().map_err(wav_error)
}

/// Write 32-bit float WAV
fn write_wav_f32(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<(), StageError> {
    let spec = WavSpec {
        channels: CANONICAL_CHANNELS,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_error)?;
    write_blocks(samples, progress, should_cancel, |block| {
        for &sample in block {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        Ok(())
    })?;
    writer.finalize().map_err(wav_error)
}

/// Write 24-bit FLAC
///
/// flacenc pulls one block at a time from the source, so cancellation and
/// progress are handled per block by [`CancellableSource`].
fn write_flac(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<(), StageError> {
    use flacenc::component::BitRepr;
    use flacenc::error::Verify;

    let scale = ((1i32 << (FLAC_BITS - 1)) - 1) as f32;
    let mut quantised = Vec::with_capacity(samples.len());
    write_blocks(samples, &|p: f64| progress(p * 0.3), should_cancel, |block| {
        quantised.extend(block.iter().map(|s| (s.clamp(-1.0, 1.0) * scale) as i32));
        Ok(())
    })?;

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| StageError::failed(format!("FLAC config invalid: {:?}", e)))?;
    let mut source = CancellableSource {
        inner: flacenc::source::MemSource::from_samples(
            &quantised,
            CANONICAL_CHANNELS as usize,
            FLAC_BITS,
            sample_rate as usize,
        ),
        total_frames: (quantised.len() / CANONICAL_CHANNELS as usize).max(1),
        read_frames: 0,
        cancelled: false,
        progress: &|p: f64| progress(0.3 + p * 0.6),
        should_cancel,
    };
    let stream = flacenc::encode_with_fixed_block_size(&config, &mut source, config.block_size)
        .map_err(|e| StageError::failed(format!("FLAC encode failed: {:?}", e)))?;

    if source.cancelled || should_cancel() {
        return Err(StageError::Cancelled);
    }
    progress(0.9);

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| StageError::failed(format!("FLAC write failed: {:?}", e)))?;
    std::fs::write(path, sink.as_slice())?;

    progress(1.0);
    Ok(())
}

/// Sample source that ends the stream early once cancellation is requested
struct CancellableSource<'a> {
    inner: flacenc::source::MemSource,
    total_frames: usize,
    read_frames: usize,
    cancelled: bool,
    progress: ProgressSink<'a>,
    should_cancel: CancelCheck<'a>,
}

impl Source for &mut CancellableSource<'_> {
    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn bits_per_sample(&self) -> usize {
        self.inner.bits_per_sample()
    }

    fn sample_rate(&self) -> usize {
        self.inner.sample_rate()
    }

    fn read_samples<F: Fill>(
        &mut self,
        block_size: usize,
        dest: &mut F,
    ) -> Result<usize, flacenc::error::SourceError> {
        if (self.should_cancel)() {
            self.cancelled = true;
            return Ok(0);
        }
        let read = self.inner.read_samples(block_size, dest)?;
        self.read_frames += read;
        (self.progress)(self.read_frames as f64 / self.total_frames as f64);
        Ok(read)
    }

    fn len_hint(&self) -> Option<usize> {
        self.inner.len_hint()
    }
}

#[cfg(feature = "mp3")]
fn write_mp3(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    bitrate_kbps: u32,
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
) -> Result<(), StageError> {
    use mp3lame_encoder::{Bitrate, Builder, FlushNoGap, InterleavedPcm};

    let bitrate = match bitrate_kbps {
        0..=128 => Bitrate::Kbps128,
        129..=192 => Bitrate::Kbps192,
        193..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    };

    let mut builder =
        Builder::new().ok_or_else(|| StageError::failed("cannot create LAME encoder"))?;
    builder
        .set_num_channels(CANONICAL_CHANNELS as u8)
        .map_err(|e| StageError::failed(format!("LAME channels: {:?}", e)))?;
    builder
        .set_sample_rate(sample_rate)
        .map_err(|e| StageError::failed(format!("LAME sample rate: {:?}", e)))?;
    builder
        .set_brate(bitrate)
        .map_err(|e| StageError::failed(format!("LAME bitrate: {:?}", e)))?;
    let mut encoder = builder
        .build()
        .map_err(|e| StageError::failed(format!("LAME init: {:?}", e)))?;

    let mut out: Vec<u8> = Vec::new();
    write_blocks(samples, progress, should_cancel, |block| {
        let pcm: Vec<i16> = block.iter().map(|&s| to_i16(s)).collect();
        out.reserve(mp3lame_encoder::max_required_buffer_size(pcm.len() / 2));
        let written = encoder
            .encode(InterleavedPcm(&pcm), out.spare_capacity_mut())
            .map_err(|e| StageError::failed(format!("MP3 encode failed: {:?}", e)))?;
        // SAFETY: the encoder initialised `written` bytes of spare capacity
        unsafe { out.set_len(out.len() + written) };
        Ok(())
    })?;

    out.reserve(7200);
    let written = encoder
        .flush::<FlushNoGap>(out.spare_capacity_mut())
        .map_err(|e| StageError::failed(format!("MP3 flush failed: {:?}", e)))?;
    // SAFETY: as above
    unsafe { out.set_len(out.len() + written) };

    std::fs::write(path, &out)?;
    Ok(())
}

#[cfg(not(feature = "mp3"))]
fn write_mp3(
    _path: &Path,
    _samples: &[f32],
    _sample_rate: u32,
    _bitrate_kbps: u32,
    _progress: ProgressSink<'_>,
    _should_cancel: CancelCheck<'_>,
) -> Result<(), StageError> {
    Err(StageError::Unsupported(
        "mp3 output requires the `mp3` feature".to_string(),
    ))
}

/// Feed interleaved stereo samples to `write` block by block
fn write_blocks(
    samples: &[f32],
    progress: ProgressSink<'_>,
    should_cancel: CancelCheck<'_>,
    mut write: impl FnMut(&[f32]) -> Result<(), StageError>,
) -> Result<(), StageError> {
    let block_len = BLOCK_FRAMES * CANONICAL_CHANNELS as usize;
    let total = samples.len().max(1);
    let mut done = 0;
    for block in samples.chunks(block_len) {
        if should_cancel() {
            return Err(StageError::Cancelled);
        }
        write(block)?;
        done += block.len();
        progress(done as f64 / total as f64);
    }
    progress(1.0);
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
