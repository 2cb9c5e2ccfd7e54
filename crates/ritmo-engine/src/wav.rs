//! WAV file I/O for pool clips.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavWriter};
use ritmo_core::AudioClip;

use crate::export::{BitDepth, ExportError};

/// Writes a clip to a WAV file at the given bit depth.
///
/// 32-bit output is IEEE float; 16 and 24 bit are linear PCM with
/// clamping.
pub fn write_clip<P: AsRef<Path>>(
    path: P,
    clip: &AudioClip,
    bit_depth: BitDepth,
) -> std::result::Result<(), ExportError> {
    let spec = hound::WavSpec {
        channels: clip.channels(),
        sample_rate: clip.sample_rate(),
        bits_per_sample: bit_depth.bits(),
        sample_format: match bit_depth {
            BitDepth::Float32 => SampleFormat::Float,
            BitDepth::Pcm16 | BitDepth::Pcm24 => SampleFormat::Int,
        },
    };
    let mut writer = WavWriter::create(&path, spec)?;

    if bit_depth == BitDepth::Float32 {
        for &sample in clip.frames() {
            writer.write_sample(sample)?;
        }
    } else {
        let max_val = (1i32 << (bit_depth.bits() - 1)) as f32;
        for &sample in clip.frames() {
            let int_sample = (sample * max_val).clamp(-max_val, max_val - 1.0) as i32;
            writer.write_sample(int_sample)?;
        }
    }

    writer.finalize()?;
    tracing::info!(
        path = %path.as_ref().display(),
        frames = clip.num_frames(),
        bits = bit_depth.bits(),
        "WAV written"
    );
    Ok(())
}

/// Reads a WAV file into a clip. Integer formats are scaled to [-1, 1).
pub fn read_clip<P: AsRef<Path>>(
    path: P,
    name: impl Into<String>,
) -> std::result::Result<AudioClip, ExportError> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(AudioClip::new(
        name,
        spec.channels,
        spec.sample_rate,
        samples,
    ))
}
