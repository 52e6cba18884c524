//! 16-bit capture timecodes

/// Extend a wrapped timecode to the first 64-bit value after `last`
///
/// A timecode equal to the last one reads as a full wrap.
pub fn unwrap_timecode(current: u16, last: i64) -> i64 {
    let high = last & !0xffff;
    let last_wrapped = (last & 0xffff) as u16;
    if current > last_wrapped {
        high | i64::from(current)
    } else {
        0x10000 + (high | i64::from(current))
    }
}

/// Tracks the last timecode of one card and counts frames lost in between
#[derive(Debug, Clone, Copy, Default)]
pub struct TimecodeTracker {
    last: Option<i64>,
}

impl TimecodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `timecode`; returns how many frames were skipped since the last one
    pub fn observe(&mut self, timecode: u16) -> u32 {
        match self.last {
            Some(last) => {
                let unwrapped = unwrap_timecode(timecode, last);
                self.last = Some(unwrapped);
                (unwrapped - last - 1) as u32
            }
            None => {
                self.last = Some(i64::from(timecode));
                0
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
