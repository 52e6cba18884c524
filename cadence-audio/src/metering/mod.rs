//! Bus and master metering

mod correlation;
mod loudness;
mod peak_history;
mod true_peak;

pub use correlation::CorrelationMeasurer;
pub use loudness::{LoudnessMeter, SILENCE_LUFS};
pub use peak_history::PeakHistory;
pub use true_peak::TruePeakDetector;

/// Meter readings for one bus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusLevel {
    /// Last frame's post-fader peak, per channel
    pub current_level_dbfs: [f32; 2],
    /// Held/decaying peak, per channel
    pub peak_level_dbfs: [f32; 2],
    /// Highest peak since the last reset, over both channels
    pub historic_peak_dbfs: f32,
    /// Gain staging in effect (manual, or implied by the level compressor)
    pub gain_staging_db: f32,
    /// Gain reduction of the bus compressor
    pub compressor_attenuation_db: f32,
}

/// Payload of one metering callback, emitted once per processed frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioLevels {
    pub momentary_lufs: f64,
    pub short_term_lufs: f64,
    pub integrated_lufs: f64,
    pub range_low_lufs: f64,
    pub range_high_lufs: f64,
    /// Oversampled peak since the last reset
    pub peak_dbfs: f32,
    pub correlation: f32,
    pub final_makeup_gain_db: f32,
    pub limiter_attenuation_db: f32,
    pub buses: Vec<BusLevel>,
}

impl AudioLevels {
    pub fn loudness_range_lu(&self) -> f64 {
        self.range_high_lufs - self.range_low_lufs
    }
}
