//! Fixed-point PCM to planar float conversion
//!
//! Capture cards deliver interleaved little-endian signed PCM in their native
//! channel layout. Buses only ever need a few of those channels, so conversion
//! picks out the requested subset while it scales.

use crate::error::ConfigError;

/// Supported fixed-point sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    S24,
    S32,
}

impl SampleFormat {
    /// Map a bit depth to a sample format
    pub fn from_bits(bits_per_sample: u32) -> Result<Self, ConfigError> {
        match bits_per_sample {
            16 => Ok(SampleFormat::S16),
            24 => Ok(SampleFormat::S24),
            32 => Ok(SampleFormat::S32),
            other => Err(ConfigError::UnsupportedBitDepth(other)),
        }
    }

    /// Bits per sample
    pub fn bits(self) -> u32 {
        match self {
            SampleFormat::S16 => 16,
            SampleFormat::S24 => 24,
            SampleFormat::S32 => 32,
        }
    }

    /// Bytes per sample
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Scale factor taking full-scale integers to [-1.0, 1.0]
    #[inline]
    fn scale(self) -> f32 {
        1.0 / (1u64 << (self.bits() - 1)) as f32
    }

    #[inline]
    fn read(self, bytes: &[u8]) -> i32 {
        match self {
            SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
            // Place the three bytes in the top of an i32, then shift back down
            // to sign-extend.
            SampleFormat::S24 => i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8,
            SampleFormat::S32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Audio format as reported by a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub num_channels: usize,
}

impl AudioFormat {
    /// Validate a bit depth and channel count from the capture layer
    pub fn new(bits_per_sample: u32, num_channels: usize) -> Result<Self, ConfigError> {
        if num_channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        Ok(Self {
            sample_format: SampleFormat::from_bits(bits_per_sample)?,
            num_channels,
        })
    }

    /// Bytes occupied by one frame (one sample on every channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes() * self.num_channels
    }
}

/// Convert interleaved fixed-point PCM into planar floats
///
/// `channels` lists the source channel indices to extract; `dst[k]` receives
/// channel `channels[k]`. Each destination is cleared and filled with exactly
/// `num_frames` samples. The caller guarantees `src` holds `num_frames` frames
/// and every index in `channels` is below `format.num_channels`.
pub fn convert_fixed_point(
    src: &[u8],
    format: AudioFormat,
    channels: &[usize],
    num_frames: usize,
    dst: &mut [Vec<f32>],
) {
    let sample_bytes = format.sample_format.bytes();
    let frame_bytes = format.bytes_per_frame();
    let scale = format.sample_format.scale();

    for (out, &channel) in dst.iter_mut().zip(channels) {
        out.clear();
        out.reserve(num_frames);
        let offset = channel * sample_bytes;
        out.extend(
            src.chunks_exact(frame_bytes)
                .take(num_frames)
                .map(|frame| format.sample_format.read(&frame[offset..offset + sample_bytes]) as f32 * scale),
        );
    }
}
