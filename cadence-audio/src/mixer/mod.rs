//! The audio mixer: device registry, bus mixing, master processing
//!
//! Three locks, always taken in this order:
//! - `state`: devices and the input mapping. Capture threads only ever
//!   `try_lock_for` it, so a busy mixer costs them a dropped chunk, never a
//!   stalled capture loop.
//! - `dynamics`: bus and master DSP state plus every operator setting.
//! - `meters`: loudness, peak and correlation meters.

mod bus;
mod master;

pub use bus::EqBand;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{MixerConfig, TIMEBASE};
use crate::device::{AudioDevice, DeviceInfo, DeviceKind, DeviceSpec};
use crate::effects::Effect;
use crate::error::ConfigError;
use crate::format::{convert_fixed_point, AudioFormat};
use crate::mapping::InputMapping;
use crate::resampling_queue::RateAdjustmentPolicy;
use crate::sink::OutputSink;

use bus::BusState;
use master::{BusReadout, MasterState, MeterState};

struct IngestState {
    devices: BTreeMap<DeviceSpec, AudioDevice>,
    mapping: InputMapping,
    // Planar conversion scratch for add_audio
    convert_buffer: Vec<Vec<f32>>,
}

struct DynamicsState {
    buses: Vec<BusState>,
    master: MasterState,
}

/// Multi-device live audio mixer
///
/// Construct once and share through an `Arc`; every method takes `&self`.
pub struct AudioMixer {
    config: MixerConfig,
    state: Mutex<IngestState>,
    dynamics: Mutex<DynamicsState>,
    meters: Mutex<MeterState>,
    output_sink: RwLock<Option<Arc<dyn OutputSink>>>,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            output_rate = config.output_sample_rate,
            ref_level_dbfs = config.ref_level_dbfs,
            ref_level_lufs = config.ref_level_lufs,
            "audio mixer created"
        );
        Self {
            state: Mutex::new(IngestState {
                devices: BTreeMap::new(),
                mapping: InputMapping::default(),
                convert_buffer: Vec::new(),
            }),
            dynamics: Mutex::new(DynamicsState {
                buses: Vec::new(),
                master: MasterState::new(&config),
            }),
            meters: Mutex::new(MeterState::new(&config)),
            output_sink: RwLock::new(None),
            config,
        }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    fn reset_device(config: &MixerConfig, device: &mut AudioDevice) {
        if let Err(e) = device.reset_resampler(config) {
            warn!(device = %device.spec, error = %e, "device will read as silence");
        }
    }

    // ---- Ingestion (capture threads) ----

    /// Queue one chunk of captured audio for `device`
    ///
    /// Returns `false` if the ingestion lock could not be taken in time; the
    /// samples are then lost and the caller may retry or drop them. Malformed
    /// chunks are dropped but still advance the device's local clock.
    pub fn add_audio(
        &self,
        spec: DeviceSpec,
        data: &[u8],
        num_samples: usize,
        format: AudioFormat,
        frame_length: i64,
    ) -> bool {
        let Some(mut guard) = self.state.try_lock_for(self.config.ingest_lock_timeout) else {
            return false;
        };
        let state = &mut *guard;
        let Some(device) = state.devices.get_mut(&spec) else {
            // No bus uses it and nobody registered it
            return true;
        };

        let local_pts = device.advance_local_pts(frame_length);
        let Some(queue) = device.resampling_queue.as_mut() else {
            return true;
        };
        if device.silenced {
            return true;
        }

        let needed = num_samples * format.bytes_per_frame();
        if data.len() < needed {
            warn!(
                device = %spec,
                got = data.len(),
                needed,
                "audio chunk shorter than its sample count, dropped"
            );
            return true;
        }

        let channels = &device.interesting_channels;
        state.convert_buffer.resize_with(channels.len(), Vec::new);
        for (dst, &channel) in state.convert_buffer.iter_mut().zip(channels.iter()) {
            if channel < format.num_channels {
                convert_fixed_point(data, format, &[channel], num_samples, std::slice::from_mut(dst));
            } else {
                // Mapped channel the card does not deliver; the queue pads it
                dst.clear();
            }
        }
        queue.add_input_samples(local_pts, &state.convert_buffer, num_samples);
        true
    }

    /// Queue `num_frames` frames of silence, `samples_per_frame` samples each
    pub fn add_silence(
        &self,
        spec: DeviceSpec,
        samples_per_frame: usize,
        num_frames: usize,
        frame_length: i64,
    ) -> bool {
        let Some(mut guard) = self.state.try_lock_for(self.config.ingest_lock_timeout) else {
            return false;
        };
        let Some(device) = guard.devices.get_mut(&spec) else {
            return true;
        };

        if device.silenced {
            // Nothing drains a silenced queue; only keep the clock moving
            for _ in 0..num_frames {
                device.advance_local_pts(frame_length);
            }
            return true;
        }

        let silence = vec![vec![0.0f32; samples_per_frame]; device.interesting_channels.len()];
        for _ in 0..num_frames {
            let local_pts = device.advance_local_pts(frame_length);
            if let Some(queue) = device.resampling_queue.as_mut() {
                queue.add_input_samples(local_pts, &silence, samples_per_frame);
            }
        }
        true
    }

    /// Mute or unmute a device; unmuting restarts its resampler
    pub fn silence_device(&self, spec: DeviceSpec, silence: bool) -> bool {
        let Some(mut guard) = self.state.try_lock_for(self.config.ingest_lock_timeout) else {
            return false;
        };
        let Some(device) = guard.devices.get_mut(&spec) else {
            return true;
        };
        if device.silenced && !silence {
            Self::reset_device(&self.config, device);
        }
        device.silenced = silence;
        true
    }

    /// Throw away buffered audio for a device after a clock discontinuity
    pub fn reset_resampler(&self, spec: DeviceSpec) {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(&spec) {
            Self::reset_device(&self.config, device);
            debug!(device = %spec, "resampler reset");
        }
    }

    // ---- Device registry (enumeration / hotplug) ----

    /// Register or update a device; registered devices survive mapping changes
    pub fn register_device(&self, spec: DeviceSpec, info: DeviceInfo) {
        let mut state = self.state.lock();
        let device = state
            .devices
            .entry(spec)
            .or_insert_with(|| AudioDevice::new(spec));

        let rate_changed = device.info.as_ref().map(|old| old.sample_rate) != Some(info.sample_rate);
        let available = info.available;
        info!(
            device = %spec,
            name = %info.display_name,
            channels = info.num_channels,
            rate = info.sample_rate,
            available,
            "device registered"
        );
        device.info = Some(info);

        if !available {
            device.silenced = true;
        } else if device.silenced || rate_changed {
            device.silenced = false;
            Self::reset_device(&self.config, device);
        }
    }

    /// Mark a registered device (un)available; unavailable devices read as silence
    pub fn set_device_available(&self, spec: DeviceSpec, available: bool) {
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(&spec) else {
            return;
        };
        if let Some(info) = device.info.as_mut() {
            info.available = available;
        }
        if available && device.silenced {
            Self::reset_device(&self.config, device);
        }
        if device.silenced == available {
            info!(device = %spec, available, "device availability changed");
        }
        device.silenced = !available;
    }

    /// Known devices and what the registry knows about them
    pub fn devices(&self) -> Vec<(DeviceSpec, Option<DeviceInfo>)> {
        let state = self.state.lock();
        state
            .devices
            .values()
            .map(|d| (d.spec, d.info.clone()))
            .collect()
    }

    // ---- Input mapping ----

    /// Replace the bus configuration
    ///
    /// Only devices whose set of used channels changes get their resampler
    /// reset. Per-bus settings are kept by bus index.
    pub fn set_input_mapping(&self, mapping: InputMapping) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        mapping.validate(|spec| {
            state
                .devices
                .get(&spec)
                .and_then(|d| d.info.as_ref())
                .map(|info| info.num_channels)
        })?;

        let mut wanted = mapping.interesting_channels();
        for (spec, device) in state.devices.iter_mut() {
            let channels = wanted.remove(spec).unwrap_or_default();
            if channels != device.interesting_channels {
                debug!(device = %spec, ?channels, "interesting channels changed");
                device.interesting_channels = channels;
                Self::reset_device(&self.config, device);
            }
        }
        for (spec, channels) in wanted {
            let mut device = AudioDevice::new(spec);
            device.interesting_channels = channels;
            Self::reset_device(&self.config, &mut device);
            state.devices.insert(spec, device);
        }

        let used = mapping.interesting_channels();
        state
            .devices
            .retain(|spec, device| device.is_held() || used.contains_key(spec));

        let num_buses = mapping.buses.len();
        let retargeted: Vec<bool> = mapping
            .buses
            .iter()
            .enumerate()
            .map(|(index, bus)| {
                state.mapping.buses.get(index).map_or(true, |old| {
                    old.device != bus.device || old.source_channel != bus.source_channel
                })
            })
            .collect();
        info!(buses = num_buses, devices = state.devices.len(), "input mapping applied");
        state.mapping = mapping;

        let mut dynamics = self.dynamics.lock();
        dynamics
            .buses
            .resize_with(num_buses, || BusState::new(&self.config));
        self.meters.lock().retarget_buses(&retargeted);
        Ok(())
    }

    pub fn input_mapping(&self) -> InputMapping {
        self.state.lock().mapping.clone()
    }

    // ---- Mixing (audio task thread) ----

    /// Produce `num_samples` stereo interleaved frames for output time `pts`
    ///
    /// Never fails: missing input is silence. Emits one level payload to the
    /// output sink per call.
    pub fn get_output(&self, pts: i64, num_samples: usize, policy: RateAdjustmentPolicy) -> Vec<f32> {
        let pts_seconds = pts as f64 / TIMEBASE as f64;
        let mut output = vec![0.0f32; num_samples * 2];

        let mut guard = self.state.lock();
        let mut dynamics = self.dynamics.lock();
        let state = &mut *guard;
        Self::fetch_device_samples(state, pts_seconds, num_samples, policy);
        Self::gather_bus_inputs(state, &mut dynamics.buses, num_samples);
        drop(guard);

        let momentary = self.meters.lock().loudness.momentary();

        let config = &self.config;
        let DynamicsState { buses, master } = &mut *dynamics;
        let mut readouts = Vec::with_capacity(buses.len());
        for (index, bus) in buses.iter_mut().enumerate() {
            bus.process_strip(master.locut_cutoff_hz, config.ref_level_dbfs);
            let peak = bus.mix_into(&mut output, index == 0);
            readouts.push(BusReadout {
                peak,
                gain_staging_db: bus.gain_staging_db,
                compressor_attenuation_db: bus.compressor_attenuation_db(),
            });
        }

        master.apply_limiter(&mut output);
        master.apply_makeup_gain(&mut output, momentary, config);
        let final_makeup_gain_db = master.final_makeup_gain_db();
        let limiter_attenuation_db = master.limiter.gain_reduction_db();
        drop(dynamics);

        let levels = self.meters.lock().update(
            &output,
            &readouts,
            final_makeup_gain_db,
            limiter_attenuation_db,
            config,
        );
        if let Some(sink) = self.output_sink() {
            sink.emit_level(&levels);
        }
        output
    }

    fn fetch_device_samples(
        state: &mut IngestState,
        pts_seconds: f64,
        num_samples: usize,
        policy: RateAdjustmentPolicy,
    ) {
        for device in state.devices.values_mut() {
            let Some(queue) = device.resampling_queue.as_mut() else {
                continue;
            };
            let len = num_samples * queue.num_channels();
            device.output_buffer.resize(len, 0.0);
            if device.silenced {
                device.output_buffer.fill(0.0);
            } else {
                queue.get_output_samples(pts_seconds, &mut device.output_buffer, num_samples, policy);
            }
        }
    }

    fn gather_bus_inputs(state: &IngestState, buses: &mut [BusState], num_samples: usize) {
        for (bus, bus_state) in state.mapping.buses.iter().zip(buses.iter_mut()) {
            bus_state.input.clear();
            bus_state.input.resize(num_samples * 2, 0.0);

            if bus.device.kind == DeviceKind::Silence {
                continue;
            }
            let Some(device) = state.devices.get(&bus.device) else {
                continue;
            };
            if device.silenced || device.resampling_queue.is_none() {
                continue;
            }

            let stride = device.interesting_channels.len();
            for (out_channel, &source) in bus.source_channel.iter().enumerate() {
                let Some(position) = usize::try_from(source)
                    .ok()
                    .and_then(|c| device.channel_position(c))
                else {
                    continue;
                };
                for (dst, frame) in bus_state
                    .input
                    .chunks_exact_mut(2)
                    .zip(device.output_buffer.chunks_exact(stride))
                {
                    dst[out_channel] = frame[position];
                }
            }
        }
    }

    // ---- Output sink ----

    pub fn set_output_sink(&self, sink: Arc<dyn OutputSink>) {
        *self.output_sink.write() = Some(sink);
    }

    pub fn output_sink(&self) -> Option<Arc<dyn OutputSink>> {
        self.output_sink.read().clone()
    }

    // ---- Operator settings ----

    fn with_bus<R>(&self, bus: usize, f: impl FnOnce(&mut BusState) -> R) -> Option<R> {
        let mut dynamics = self.dynamics.lock();
        let result = dynamics.buses.get_mut(bus).map(f);
        if result.is_none() {
            debug!(bus, "no such bus");
        }
        result
    }

    pub fn fader_volume_db(&self, bus: usize) -> Option<f32> {
        self.with_bus(bus, |b| b.fader_volume_db)
    }

    pub fn set_fader_volume_db(&self, bus: usize, db: f32) {
        self.with_bus(bus, |b| b.fader_volume_db = db);
    }

    pub fn eq(&self, bus: usize, band: EqBand) -> Option<f32> {
        self.with_bus(bus, |b| b.eq(band))
    }

    pub fn set_eq(&self, bus: usize, band: EqBand, db: f32) {
        self.with_bus(bus, |b| b.set_eq(band, db));
    }

    pub fn compressor_threshold_dbfs(&self, bus: usize) -> Option<f32> {
        self.with_bus(bus, |b| b.compressor_threshold_dbfs)
    }

    pub fn set_compressor_threshold_dbfs(&self, bus: usize, dbfs: f32) {
        self.with_bus(bus, |b| b.compressor_threshold_dbfs = dbfs);
    }

    pub fn compressor_enabled(&self, bus: usize) -> Option<bool> {
        self.with_bus(bus, |b| b.compressor.is_enabled())
    }

    pub fn set_compressor_enabled(&self, bus: usize, enabled: bool) {
        self.with_bus(bus, |b| b.compressor.set_enabled(enabled));
    }

    pub fn locut_enabled(&self, bus: usize) -> Option<bool> {
        self.with_bus(bus, |b| b.locut.is_enabled())
    }

    pub fn set_locut_enabled(&self, bus: usize, enabled: bool) {
        self.with_bus(bus, |b| b.locut.set_enabled(enabled));
    }

    pub fn level_compressor_enabled(&self, bus: usize) -> Option<bool> {
        self.with_bus(bus, |b| b.level_compressor.is_enabled())
    }

    pub fn set_level_compressor_enabled(&self, bus: usize, enabled: bool) {
        self.with_bus(bus, |b| b.level_compressor.set_enabled(enabled));
    }

    /// Gain staging in effect; implied by the level compressor when it is on
    pub fn gain_staging_db(&self, bus: usize) -> Option<f32> {
        self.with_bus(bus, |b| b.gain_staging_db)
    }

    pub fn set_gain_staging_db(&self, bus: usize, db: f32) {
        self.with_bus(bus, |b| b.gain_staging_db = db);
    }

    pub fn locut_cutoff_hz(&self) -> f32 {
        self.dynamics.lock().master.locut_cutoff_hz
    }

    pub fn set_locut_cutoff_hz(&self, hz: f32) {
        self.dynamics.lock().master.locut_cutoff_hz = hz;
    }

    pub fn limiter_threshold_dbfs(&self) -> f32 {
        self.dynamics.lock().master.limiter_threshold_dbfs
    }

    pub fn set_limiter_threshold_dbfs(&self, dbfs: f32) {
        self.dynamics.lock().master.limiter_threshold_dbfs = dbfs;
    }

    pub fn limiter_enabled(&self) -> bool {
        self.dynamics.lock().master.limiter.is_enabled()
    }

    pub fn set_limiter_enabled(&self, enabled: bool) {
        self.dynamics.lock().master.limiter.set_enabled(enabled);
    }

    pub fn final_makeup_gain_auto(&self) -> bool {
        self.dynamics.lock().master.final_makeup_gain_auto
    }

    pub fn set_final_makeup_gain_auto(&self, auto: bool) {
        self.dynamics.lock().master.final_makeup_gain_auto = auto;
    }

    pub fn final_makeup_gain_db(&self) -> f32 {
        self.dynamics.lock().master.final_makeup_gain_db()
    }

    pub fn set_final_makeup_gain_db(&self, db: f32) {
        self.dynamics.lock().master.set_final_makeup_gain_db(db);
    }

    /// Clear loudness history, the monotonic peak, and bus peak holds
    pub fn reset_meters(&self) {
        self.meters.lock().reset();
    }

    // ---- Inspection ----

    /// Local clock of a device's next input chunk, in TIMEBASE ticks
    pub fn device_local_pts(&self, spec: DeviceSpec) -> Option<i64> {
        self.state.lock().devices.get(&spec).map(|d| d.next_local_pts)
    }

    /// Input frames waiting in a device's resampling queue
    pub fn buffered_input_frames(&self, spec: DeviceSpec) -> Option<usize> {
        let state = self.state.lock();
        state
            .devices
            .get(&spec)
            .and_then(|d| d.resampling_queue.as_ref())
            .map(|q| q.buffered_input_frames())
    }

    pub fn device_silenced(&self, spec: DeviceSpec) -> Option<bool> {
        self.state.lock().devices.get(&spec).map(|d| d.silenced)
    }
}

#[cfg(test)]
mod tests;
