//! Where the mixer's output goes in the binary

use parking_lot::Mutex;

use cadence_audio::{AudioLevels, OutputSink};

use crate::monitor::MonitorFeed;

/// Feeds the monitor and keeps the latest meter readings for the level log
pub struct AppSink {
    monitor: Option<MonitorFeed>,
    levels: Mutex<Option<AudioLevels>>,
    dropped_samples: Mutex<u64>,
}

impl AppSink {
    pub fn new(monitor: Option<MonitorFeed>) -> Self {
        Self {
            monitor,
            levels: Mutex::new(None),
            dropped_samples: Mutex::new(0),
        }
    }

    /// Latest readings, if any frame was mixed since the last call
    pub fn take_levels(&self) -> Option<AudioLevels> {
        self.levels.lock().take()
    }

    /// Samples the monitor buffer had no room for
    pub fn dropped_samples(&self) -> u64 {
        *self.dropped_samples.lock()
    }
}

impl OutputSink for AppSink {
    fn emit_frame(&self, _pts: i64, samples: &[f32]) {
        if let Some(monitor) = &self.monitor {
            let pushed = monitor.push(samples);
            if pushed < samples.len() {
                *self.dropped_samples.lock() += (samples.len() - pushed) as u64;
            }
        }
    }

    fn emit_level(&self, levels: &AudioLevels) {
        *self.levels.lock() = Some(levels.clone());
    }
}

/// One-line summary of the master meters
pub fn format_levels(levels: &AudioLevels) -> String {
    let buses = levels
        .buses
        .iter()
        .enumerate()
        .map(|(i, bus)| {
            format!(
                "bus{} {:.1}/{:.1} dBFS",
                i, bus.peak_level_dbfs[0], bus.peak_level_dbfs[1]
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "M {:.1} S {:.1} I {:.1} LUFS, LRA {:.1} LU, peak {:.1} dBFS, corr {:+.2}, makeup {:+.1} dB [{}]",
        levels.momentary_lufs,
        levels.short_term_lufs,
        levels.integrated_lufs,
        levels.loudness_range_lu(),
        levels.peak_dbfs,
        levels.correlation,
        levels.final_makeup_gain_db,
        buses
    )
}
