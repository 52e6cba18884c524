//! Master bus: limiter, final makeup gain, and the meters fed by the final mix

use crate::config::{from_db, to_db, MixerConfig};
use crate::effects::{CompressorParams, Effect, StereoCompressor};
use crate::metering::{
    AudioLevels, BusLevel, CorrelationMeasurer, LoudnessMeter, PeakHistory, TruePeakDetector,
};

/// Per-sample one-pole coefficient giving the requested half-life
pub(crate) fn makeup_alpha(half_life_seconds: f64, sample_rate: u32) -> f64 {
    1.0 - 0.5f64.powf(1.0 / (half_life_seconds * sample_rate as f64))
}

/// Master dynamics, guarded by the dynamics lock
pub(crate) struct MasterState {
    pub limiter: StereoCompressor,
    pub limiter_threshold_dbfs: f32,
    /// Linear, kept in f64 for slow adaptation
    pub final_makeup_gain: f64,
    pub final_makeup_gain_auto: bool,
    pub locut_cutoff_hz: f32,
}

impl MasterState {
    pub fn new(config: &MixerConfig) -> Self {
        let threshold = config.default_limiter_threshold_dbfs();
        Self {
            limiter: StereoCompressor::new(
                config.output_sample_rate as f32,
                CompressorParams::limiter(threshold),
            ),
            limiter_threshold_dbfs: threshold,
            final_makeup_gain: 1.0,
            final_makeup_gain_auto: true,
            locut_cutoff_hz: config.locut_cutoff_hz,
        }
    }

    pub fn apply_limiter(&mut self, samples: &mut [f32]) {
        self.limiter.set_threshold_dbfs(self.limiter_threshold_dbfs);
        self.limiter.process(samples);
    }

    /// Apply the final makeup gain, steering it toward the reference loudness
    ///
    /// `momentary_lufs` is the loudness of the final mix so far, i.e. already
    /// after the current makeup gain. Outside the freeze window (or in manual
    /// mode) the gain is held for the whole frame.
    pub fn apply_makeup_gain(&mut self, samples: &mut [f32], momentary_lufs: f64, config: &MixerConfig) {
        let loudness_lu = momentary_lufs - config.ref_level_lufs;
        let target = self.final_makeup_gain * 10f64.powf(-loudness_lu / 20.0);

        let alpha = if !self.final_makeup_gain_auto || loudness_lu.abs() >= config.makeup_gain_freeze_lu {
            0.0
        } else {
            makeup_alpha(config.makeup_gain_half_life_seconds, config.output_sample_rate)
        };

        let mut gain = self.final_makeup_gain;
        for frame in samples.chunks_exact_mut(2) {
            frame[0] = (frame[0] as f64 * gain) as f32;
            frame[1] = (frame[1] as f64 * gain) as f32;
            gain += alpha * (target - gain);
        }
        self.final_makeup_gain = gain;
    }

    pub fn final_makeup_gain_db(&self) -> f32 {
        to_db(self.final_makeup_gain as f32)
    }

    pub fn set_final_makeup_gain_db(&mut self, db: f32) {
        self.final_makeup_gain = from_db(db) as f64;
    }
}

/// Per-bus values the meters report but the dynamics own
#[derive(Clone, Copy)]
pub(crate) struct BusReadout {
    pub peak: [f32; 2],
    pub gain_staging_db: f32,
    pub compressor_attenuation_db: f32,
}

/// Meter state, guarded by the metering lock
pub(crate) struct MeterState {
    pub loudness: LoudnessMeter,
    pub correlation: CorrelationMeasurer,
    pub true_peak: TruePeakDetector,
    /// Linear, monotonic until reset
    pub peak: f32,
    pub peak_history: Vec<[PeakHistory; 2]>,
}

impl MeterState {
    pub fn new(config: &MixerConfig) -> Self {
        Self {
            loudness: LoudnessMeter::new(config.output_sample_rate),
            correlation: CorrelationMeasurer::new(config.output_sample_rate),
            true_peak: TruePeakDetector::new(),
            peak: 0.0,
            peak_history: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.loudness.reset();
        self.correlation.reset();
        self.true_peak.reset();
        self.peak = 0.0;
        for history in self.peak_history.iter_mut().flatten() {
            history.reset();
        }
    }

    /// Follow a mapping change: one flag per new bus, set where the bus now
    /// reads a different source and its peak history no longer applies
    pub fn retarget_buses(&mut self, retargeted: &[bool]) {
        self.peak_history.truncate(retargeted.len());
        for (history, &changed) in self.peak_history.iter_mut().zip(retargeted) {
            if changed {
                history.iter_mut().for_each(PeakHistory::reset);
            }
        }
    }

    /// Feed the final mix and bus readouts, returning this frame's levels
    pub fn update(
        &mut self,
        output: &[f32],
        buses: &[BusReadout],
        final_makeup_gain_db: f32,
        limiter_attenuation_db: f32,
        config: &MixerConfig,
    ) -> AudioLevels {
        self.loudness.process(output);
        self.correlation.process(output);
        self.peak = self.peak.max(self.true_peak.process(output));

        let frame_seconds = (output.len() / 2) as f32 / config.output_sample_rate as f32;
        if self.peak_history.len() < buses.len() {
            self.peak_history.resize_with(buses.len(), Default::default);
        }

        let bus_levels = buses
            .iter()
            .zip(self.peak_history.iter_mut())
            .map(|(bus, history)| {
                for (channel, h) in history.iter_mut().enumerate() {
                    h.update(
                        bus.peak[channel],
                        frame_seconds,
                        config.peak_hold_seconds,
                        config.peak_decay_db_per_second,
                    );
                }
                BusLevel {
                    current_level_dbfs: [to_db(history[0].current_level), to_db(history[1].current_level)],
                    peak_level_dbfs: [to_db(history[0].current_peak), to_db(history[1].current_peak)],
                    historic_peak_dbfs: to_db(history[0].historic_peak.max(history[1].historic_peak)),
                    gain_staging_db: bus.gain_staging_db,
                    compressor_attenuation_db: bus.compressor_attenuation_db,
                }
            })
            .collect();

        let (range_low_lufs, range_high_lufs) = self.loudness.range();
        AudioLevels {
            momentary_lufs: self.loudness.momentary(),
            short_term_lufs: self.loudness.short_term(),
            integrated_lufs: self.loudness.integrated(),
            range_low_lufs,
            range_high_lufs,
            peak_dbfs: to_db(self.peak),
            correlation: self.correlation.correlation(),
            final_makeup_gain_db,
            limiter_attenuation_db,
            buses: bus_levels,
        }
    }
}
