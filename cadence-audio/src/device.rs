//! Audio device identity and per-device ingestion state

use std::collections::BTreeSet;
use std::fmt;

use crate::config::{MixerConfig, TIMEBASE};
use crate::error::ConfigError;
use crate::resampling_queue::ResamplingQueue;

/// Kind of audio source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKind {
    /// Audio embedded in a video capture card's stream
    CaptureCard,
    /// Standalone audio interface
    HardwareAudioInput,
    /// Always-silent placeholder
    Silence,
}

/// Identifies an audio source; the only device handle callers ever hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub index: usize,
}

impl DeviceSpec {
    pub const fn new(kind: DeviceKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub const fn capture_card(index: usize) -> Self {
        Self::new(DeviceKind::CaptureCard, index)
    }

    pub const fn audio_input(index: usize) -> Self {
        Self::new(DeviceKind::HardwareAudioInput, index)
    }

    pub const fn silence() -> Self {
        Self::new(DeviceKind::Silence, 0)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::CaptureCard => write!(f, "capture card {}", self.index),
            DeviceKind::HardwareAudioInput => write!(f, "audio input {}", self.index),
            DeviceKind::Silence => write!(f, "silence"),
        }
    }
}

/// What the enumeration layer knows about a device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub display_name: String,
    pub num_channels: usize,
    pub sample_rate: u32,
    pub available: bool,
}

/// Ingestion state for one device, owned by the mixer
pub(crate) struct AudioDevice {
    pub spec: DeviceSpec,
    pub info: Option<DeviceInfo>,
    /// Native channels some bus consumes, in ascending order
    pub interesting_channels: BTreeSet<usize>,
    pub resampling_queue: Option<ResamplingQueue>,
    /// Local clock for the next input chunk, in TIMEBASE ticks
    pub next_local_pts: i64,
    pub silenced: bool,
    /// Interleaved resampled output for the frame being mixed
    pub output_buffer: Vec<f32>,
}

impl AudioDevice {
    pub fn new(spec: DeviceSpec) -> Self {
        Self {
            spec,
            info: None,
            interesting_channels: BTreeSet::new(),
            resampling_queue: None,
            next_local_pts: 0,
            silenced: false,
            output_buffer: Vec::new(),
        }
    }

    /// Registered devices are kept even when no bus uses them
    pub fn is_held(&self) -> bool {
        self.info.is_some()
    }

    pub fn sample_rate(&self, config: &MixerConfig) -> u32 {
        self.info
            .as_ref()
            .map_or(config.default_device_sample_rate, |info| info.sample_rate)
    }

    /// Position of a native channel within the resampled (interesting) channels
    pub fn channel_position(&self, channel: usize) -> Option<usize> {
        if !self.interesting_channels.contains(&channel) {
            return None;
        }
        Some(self.interesting_channels.range(..channel).count())
    }

    /// Throw away all buffering and restart the local clock
    ///
    /// Devices nobody listens to get no queue at all. On error the device is
    /// left without a queue and reads as silence.
    pub fn reset_resampler(&mut self, config: &MixerConfig) -> Result<(), ConfigError> {
        self.next_local_pts = 0;
        self.resampling_queue = None;
        if self.interesting_channels.is_empty() || self.spec.kind == DeviceKind::Silence {
            return Ok(());
        }

        let name = self
            .info
            .as_ref()
            .map_or_else(|| self.spec.to_string(), |info| info.display_name.clone());
        let queue = ResamplingQueue::new(
            name,
            self.sample_rate(config),
            config.output_sample_rate,
            self.interesting_channels.len(),
            config.resampler_target_delay_seconds,
            config.resampler_max_delay_seconds,
        )
        .map_err(|e| ConfigError::Resampler {
            device: self.spec,
            reason: e.to_string(),
        })?;
        self.resampling_queue = Some(queue);
        Ok(())
    }

    /// Local pts in seconds for the next input chunk, advancing the cursor
    pub fn advance_local_pts(&mut self, frame_length: i64) -> f64 {
        let pts = self.next_local_pts as f64 / TIMEBASE as f64;
        self.next_local_pts += frame_length;
        pts
    }
}
