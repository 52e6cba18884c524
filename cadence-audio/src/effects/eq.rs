//! Three-band bus EQ
//!
//! The mid band is a flat gain over the whole signal. Bass and treble are
//! shelves whose gain is taken relative to the mid band.

use super::filter::{FilterType, StereoFilter};
use super::Effect;
use crate::config::from_db;

/// Bass shelf corner frequency
pub const BASS_FREQ_HZ: f32 = 200.0;
/// Treble shelf corner frequency
pub const TREBLE_FREQ_HZ: f32 = 4700.0;
/// Scale from a dB difference to the shelf's normalized gain exponent
pub const SHELF_GAIN_SCALE: f32 = 1.0 / 40.0;

/// Bands below this are treated as flat
const FLAT_DB: f32 = 0.01;

pub struct ThreeBandEq {
    bass: StereoFilter,
    treble: StereoFilter,
}

impl ThreeBandEq {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            bass: StereoFilter::new(FilterType::LowShelf, sample_rate, BASS_FREQ_HZ),
            treble: StereoFilter::new(FilterType::HighShelf, sample_rate, TREBLE_FREQ_HZ),
        }
    }

    /// Apply the EQ in place (stereo interleaved)
    pub fn process(&mut self, samples: &mut [f32], bass_db: f32, mid_db: f32, treble_db: f32) {
        if mid_db.abs() > FLAT_DB {
            let gain = from_db(mid_db);
            for s in samples.iter_mut() {
                *s *= gain;
            }
        }

        Self::shelf(&mut self.bass, samples, bass_db - mid_db);
        Self::shelf(&mut self.treble, samples, treble_db - mid_db);
    }

    /// Run a shelf, or skip it and drop its history while it is flat
    fn shelf(filter: &mut StereoFilter, samples: &mut [f32], adj_db: f32) {
        if adj_db.abs() > FLAT_DB {
            filter.set_shelf_gain(adj_db * SHELF_GAIN_SCALE);
            filter.process(samples);
        } else {
            filter.reset();
        }
    }
}
