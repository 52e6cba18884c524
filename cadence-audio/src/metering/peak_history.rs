//! Hold-then-decay peak tracking for bus meters

use crate::config::from_db;

/// Peak state for one bus channel; all levels linear
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeakHistory {
    /// Peak of the most recent frame
    pub current_level: f32,
    /// Displayed peak (held, then decaying)
    pub current_peak: f32,
    /// Highest peak since the last meter reset
    pub historic_peak: f32,
    /// Value the hold/decay starts from
    pub last_peak: f32,
    /// Time since `last_peak` was set
    pub age_seconds: f32,
}

impl PeakHistory {
    /// Feed the peak of one frame lasting `frame_seconds`
    pub fn update(
        &mut self,
        peak: f32,
        frame_seconds: f32,
        hold_seconds: f32,
        decay_db_per_second: f32,
    ) {
        self.current_level = peak;
        self.historic_peak = self.historic_peak.max(peak);

        self.age_seconds += frame_seconds;
        self.current_peak = if self.age_seconds < hold_seconds {
            self.last_peak
        } else {
            self.last_peak * from_db(-decay_db_per_second * (self.age_seconds - hold_seconds))
        };

        if peak >= self.current_peak {
            self.last_peak = peak;
            self.current_peak = peak;
            self.age_seconds = 0.0;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
