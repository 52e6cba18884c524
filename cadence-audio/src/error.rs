//! Setup-time configuration errors
//!
//! Everything in here is a precondition violation caught while configuring
//! the mixer. The per-frame path never returns these; it degrades to silence
//! and logs instead.

use thiserror::Error;

use crate::device::DeviceSpec;

/// Errors raised while configuring devices, formats, or the input mapping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported bit depth: {0} bits per sample")]
    UnsupportedBitDepth(u32),
    #[error("audio format has no channels")]
    NoChannels,
    #[error("bus {bus} ('{name}') references channel {channel} of {device}, which has {available} channel(s)")]
    ChannelOutOfRange {
        bus: usize,
        name: String,
        device: DeviceSpec,
        channel: i32,
        available: usize,
    },
    #[error("bus {bus} ('{name}') has invalid channel index {channel}")]
    InvalidChannelIndex { bus: usize, name: String, channel: i32 },
    #[error("resampler for {device} could not be created: {reason}")]
    Resampler { device: DeviceSpec, reason: String },
}
