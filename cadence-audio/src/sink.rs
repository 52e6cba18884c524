//! Output side of the mixer: where mixed audio and meter readings go

use crate::metering::AudioLevels;

/// Consumer of the mixer's output
///
/// Backends implement whichever capability they care about; the other one
/// defaults to a no-op. Both are called from the audio task thread and must
/// not block for long.
pub trait OutputSink: Send + Sync {
    /// One mixed stereo interleaved frame at output time `pts` (TIMEBASE ticks)
    fn emit_frame(&self, _pts: i64, _samples: &[f32]) {}

    /// Meter readings, once per processed frame
    fn emit_level(&self, _levels: &AudioLevels) {}
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {}
