//! Tuning constants for the mixing engine
//!
//! Every empirically chosen number the engine depends on lives here, with the
//! production values as defaults.

use std::time::Duration;

/// Integer ticks per second used for every pts in the system
pub const TIMEBASE: i64 = 120_000;

/// Mixer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    /// Output sample rate in Hz
    pub output_sample_rate: u32,
    /// Reference level the gain staging aims for, in dBFS
    pub ref_level_dbfs: f32,
    /// Reference loudness the final makeup gain aims for, in LUFS
    pub ref_level_lufs: f64,
    /// Default locut cutoff in Hz
    pub locut_cutoff_hz: f32,
    /// Peak meter hold time in seconds
    pub peak_hold_seconds: f32,
    /// Peak meter decay after the hold, in dB per second
    pub peak_decay_db_per_second: f32,
    /// Half-life of the final makeup gain adaptation, in seconds
    pub makeup_gain_half_life_seconds: f64,
    /// Loudness deviation (LU) beyond which the makeup gain is frozen
    pub makeup_gain_freeze_lu: f64,
    /// How long a capture thread may wait for the ingestion lock
    pub ingest_lock_timeout: Duration,
    /// Buffered input the resampling queues aim to hold, in seconds
    pub resampler_target_delay_seconds: f64,
    /// Buffered input beyond which a resampling queue discards its oldest data
    pub resampler_max_delay_seconds: f64,
    /// Sample rate assumed for devices nobody registered
    pub default_device_sample_rate: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 48_000,
            ref_level_dbfs: -14.0,
            ref_level_lufs: -23.0,
            locut_cutoff_hz: 120.0,
            peak_hold_seconds: 0.5,
            peak_decay_db_per_second: 15.0,
            makeup_gain_half_life_seconds: 30.0,
            makeup_gain_freeze_lu: 5.0,
            ingest_lock_timeout: Duration::from_millis(10),
            resampler_target_delay_seconds: 0.05,
            resampler_max_delay_seconds: 1.0,
            default_device_sample_rate: 48_000,
        }
    }
}

impl MixerConfig {
    /// Default compressor threshold: 12 dB under the reference level
    pub fn default_compressor_threshold_dbfs(&self) -> f32 {
        self.ref_level_dbfs - 12.0
    }

    /// Default limiter threshold: 4 dB over the reference level
    pub fn default_limiter_threshold_dbfs(&self) -> f32 {
        self.ref_level_dbfs + 4.0
    }
}

/// Convert dB to linear amplitude
#[inline]
pub fn from_db(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert linear amplitude to dB
#[inline]
pub fn to_db(linear: f32) -> f32 {
    if linear > 1e-10 {
        20.0 * linear.log10()
    } else {
        -200.0
    }
}
