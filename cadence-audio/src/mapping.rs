//! Input mapping: which device channels feed which bus

use std::collections::{BTreeMap, BTreeSet};

use crate::device::{DeviceKind, DeviceSpec};
use crate::error::ConfigError;

/// One stereo mixing channel strip
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub name: String,
    pub device: DeviceSpec,
    /// Native channel for left and right; -1 means silence
    pub source_channel: [i32; 2],
}

impl Bus {
    pub fn new(name: impl Into<String>, device: DeviceSpec, left: i32, right: i32) -> Self {
        Self {
            name: name.into(),
            device,
            source_channel: [left, right],
        }
    }

    /// Native channels this bus actually reads
    pub fn used_channels(&self) -> impl Iterator<Item = usize> + '_ {
        let silent = self.device.kind == DeviceKind::Silence;
        self.source_channel
            .iter()
            .filter(move |&&c| c >= 0 && !silent)
            .map(|&c| c as usize)
    }
}

/// Ordered list of buses
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputMapping {
    pub buses: Vec<Bus>,
}

impl InputMapping {
    pub fn new(buses: Vec<Bus>) -> Self {
        Self { buses }
    }

    /// Check channel indices; `channel_count` reports known device widths
    pub fn validate(
        &self,
        channel_count: impl Fn(DeviceSpec) -> Option<usize>,
    ) -> Result<(), ConfigError> {
        for (index, bus) in self.buses.iter().enumerate() {
            for &channel in &bus.source_channel {
                if channel < -1 {
                    return Err(ConfigError::InvalidChannelIndex {
                        bus: index,
                        name: bus.name.clone(),
                        channel,
                    });
                }
            }
            if let Some(available) = channel_count(bus.device) {
                if let Some(channel) = bus.used_channels().find(|&c| c >= available) {
                    return Err(ConfigError::ChannelOutOfRange {
                        bus: index,
                        name: bus.name.clone(),
                        device: bus.device,
                        channel: channel as i32,
                        available,
                    });
                }
            }
        }
        Ok(())
    }

    /// Channel sets per device, as the buses reference them
    pub fn interesting_channels(&self) -> BTreeMap<DeviceSpec, BTreeSet<usize>> {
        let mut channels: BTreeMap<DeviceSpec, BTreeSet<usize>> = BTreeMap::new();
        for bus in &self.buses {
            let set = channels.entry(bus.device).or_default();
            set.extend(bus.used_channels());
        }
        channels
    }
}
