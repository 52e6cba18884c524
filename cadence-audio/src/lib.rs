//! Audio engine for Cadence - multi-clock ingestion, buses, and master dynamics
//!
//! This crate provides the mixing pipeline:
//! - Format: fixed-point capture audio to planar float
//! - Resampling queue: per-device clock drift compensation
//! - Mixer: device registry, input mapping, bus strips, master bus
//! - Metering: loudness (LUFS), true peak, correlation, bus peak holds

mod config;
mod device;
mod error;
mod format;
mod mapping;
mod mixer;
mod resampling_queue;
mod sink;
pub mod effects;
pub mod metering;

pub use config::{from_db, to_db, MixerConfig, TIMEBASE};
pub use device::{DeviceInfo, DeviceKind, DeviceSpec};
pub use error::ConfigError;
pub use format::{convert_fixed_point, AudioFormat, SampleFormat};
pub use mapping::{Bus, InputMapping};
pub use metering::{AudioLevels, BusLevel};
pub use mixer::{AudioMixer, EqBand};
pub use resampling_queue::{RateAdjustmentPolicy, ResamplingQueue};
pub use sink::{NullSink, OutputSink};
