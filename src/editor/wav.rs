//! WAV encoders used to hand mixed buffers to external services.
//!
//! Both variants write little-endian RIFF/WAVE with a plain 44-byte header:
//! 16-bit PCM (format 1) and 32-bit IEEE float (format 3). Oversized mixes
//! are rejected up front rather than truncated.

use std::{error::Error, fmt::Display, path::Path};

use super::buffer::AudioBuffer;

/// Hard ceiling on the encoded file size: 1 GiB.
pub const MAX_WAV_BYTES: u64 = 1 << 30;
/// Hard ceiling on the encoded duration: 2 hours.
pub const MAX_WAV_SECONDS: f64 = 2.0 * 60.0 * 60.0;

const HEADER_BYTES: u64 = 44;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WavFormat {
    /// 16-bit integer PCM, fmt tag 1.
    Pcm16,
    /// 32-bit IEEE float, fmt tag 3.
    Float32,
}
impl WavFormat {
    fn bytes_per_sample(self) -> u64 {
        match self {
            WavFormat::Pcm16 => 2,
            WavFormat::Float32 => 4,
        }
    }
}

/// Convert a float sample to 16-bit PCM: asymmetric scaling, clamped to
/// `[-1, 1]`.
pub fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 0x8000 as f32) as i16
    } else {
        (clamped * 0x7FFF as f32) as i16
    }
}

/// Encode a buffer to a WAV file at `path`.
pub fn encode_wav(
    buffer: &AudioBuffer,
    format: WavFormat,
    path: &Path,
) -> Result<(), WavEncodeError> {
    check_limits(
        buffer.len(),
        buffer.channels(),
        buffer.sample_rate(),
        format,
    )?;

    let spec = hound::WavSpec {
        channels: buffer.channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: (format.bytes_per_sample() * 8) as u16,
        sample_format: match format {
            WavFormat::Pcm16 => hound::SampleFormat::Int,
            WavFormat::Float32 => hound::SampleFormat::Float,
        },
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    match format {
        WavFormat::Pcm16 => {
            for sample in buffer.interleaved() {
                writer.write_sample(sample_to_i16(sample))?;
            }
        }
        WavFormat::Float32 => {
            for sample in buffer.interleaved() {
                writer.write_sample(sample)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

fn check_limits(
    frames: usize,
    channels: usize,
    sample_rate: u32,
    format: WavFormat,
) -> Result<(), WavEncodeError> {
    let duration = frames as f64 / f64::from(sample_rate);
    if duration > MAX_WAV_SECONDS {
        return Err(WavEncodeError::TooLong { seconds: duration });
    }
    let bytes = HEADER_BYTES + frames as u64 * channels as u64 * format.bytes_per_sample();
    if bytes > MAX_WAV_BYTES {
        return Err(WavEncodeError::TooLarge { bytes });
    }
    Ok(())
}

#[derive(Debug)]
pub enum WavEncodeError {
    /// The encoded file would exceed [`MAX_WAV_BYTES`].
    TooLarge { bytes: u64 },
    /// The mix exceeds [`MAX_WAV_SECONDS`].
    TooLong { seconds: f64 },
    Write(hound::Error),
}
impl Display for WavEncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { bytes } => {
                write!(f, "Encoded WAV would be {bytes} bytes, over the 1 GiB limit")
            }
            Self::TooLong { seconds } => {
                write!(f, "Mix is {seconds:.0} seconds long, over the 2 hour limit")
            }
            Self::Write(e) => write!(f, "WAV file could not be written: {e}"),
        }
    }
}
impl Error for WavEncodeError {}
impl From<hound::Error> for WavEncodeError {
    fn from(e: hound::Error) -> Self {
        Self::Write(e)
    }
}
