//! DSP building blocks for the bus and master chains

mod compressor;
mod eq;
mod filter;

pub use compressor::{CompressorParams, StereoCompressor};
pub use eq::{ThreeBandEq, BASS_FREQ_HZ, SHELF_GAIN_SCALE, TREBLE_FREQ_HZ};
pub use filter::{FilterType, StereoFilter};

/// Trait for audio effects
pub trait Effect: Send {
    /// Process audio samples in place (stereo interleaved)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);

    /// Check if effect is enabled
    fn is_enabled(&self) -> bool;

    /// Enable/disable the effect
    fn set_enabled(&mut self, enabled: bool);
}
