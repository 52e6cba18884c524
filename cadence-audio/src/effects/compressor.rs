//! Stereo-linked hard-knee compressor
//!
//! One engine serves three roles: the per-bus level compressor (slow gain
//! riding toward the reference level), the per-bus compressor, and the
//! master limiter (zero attack).

use crate::config::{from_db, to_db};
use crate::effects::Effect;

/// Compressor settings; times in seconds, levels in dB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    pub threshold_dbfs: f32,
    pub ratio: f32,
    pub attack_seconds: f32,
    pub release_seconds: f32,
    pub makeup_db: f32,
}

impl CompressorParams {
    /// Level compressor threshold; anything above is pulled toward the reference
    pub const LEVEL_THRESHOLD_DBFS: f32 = -40.0;

    /// Slow gain rider that lifts quiet inputs to the reference level
    pub fn level_compressor(ref_level_dbfs: f32) -> Self {
        Self {
            threshold_dbfs: Self::LEVEL_THRESHOLD_DBFS,
            ratio: 20.0,
            attack_seconds: 0.5,
            release_seconds: 20.0,
            makeup_db: ref_level_dbfs - Self::LEVEL_THRESHOLD_DBFS,
        }
    }

    /// Fast per-bus compressor
    pub fn bus_compressor(threshold_dbfs: f32) -> Self {
        Self {
            threshold_dbfs,
            ratio: 20.0,
            attack_seconds: 0.005,
            release_seconds: 0.040,
            makeup_db: 6.0,
        }
    }

    /// Master limiter; only catches the worst transients
    pub fn limiter(threshold_dbfs: f32) -> Self {
        Self {
            threshold_dbfs,
            ratio: 30.0,
            attack_seconds: 0.0,
            release_seconds: 0.020,
            makeup_db: 0.0,
        }
    }
}

/// Stereo compressor with a linked peak detector
pub struct StereoCompressor {
    enabled: bool,
    sample_rate: f32,
    params: CompressorParams,

    // Computed from params
    threshold: f32,
    makeup: f32,
    attack_coeff: f32,
    release_coeff: f32,

    // Detector envelope (linear peak level)
    level: f32,
    // Gain applied to the last sample, excluding makeup
    attenuation: f32,
}

impl StereoCompressor {
    pub fn new(sample_rate: f32, params: CompressorParams) -> Self {
        let mut comp = Self {
            enabled: true,
            sample_rate,
            params,
            threshold: 1.0,
            makeup: 1.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            level: 0.0,
            attenuation: 1.0,
        };
        comp.update_coefficients();
        comp
    }

    /// Replace settings; envelope state is kept
    pub fn set_params(&mut self, params: CompressorParams) {
        if params != self.params {
            self.params = params;
            self.update_coefficients();
        }
    }

    pub fn set_threshold_dbfs(&mut self, threshold_dbfs: f32) {
        self.set_params(CompressorParams {
            threshold_dbfs,
            ..self.params
        });
    }

    /// Linear gain applied to the last processed sample, before makeup
    pub fn attenuation(&self) -> f32 {
        self.attenuation
    }

    /// Current gain reduction in dB (for metering)
    pub fn gain_reduction_db(&self) -> f32 {
        to_db(self.attenuation)
    }

    /// Makeup gain as a linear factor
    pub fn makeup(&self) -> f32 {
        self.makeup
    }

    fn update_coefficients(&mut self) {
        self.threshold = from_db(self.params.threshold_dbfs);
        self.makeup = from_db(self.params.makeup_db);
        self.attack_coeff = Self::time_coeff(self.params.attack_seconds, self.sample_rate);
        self.release_coeff = Self::time_coeff(self.params.release_seconds, self.sample_rate);
    }

    /// One-pole coefficient for a time constant; zero means instant
    #[inline]
    fn time_coeff(seconds: f32, sample_rate: f32) -> f32 {
        if seconds <= 0.0 {
            0.0
        } else {
            (-1.0 / (sample_rate * seconds)).exp()
        }
    }

    #[inline]
    fn process_sample(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak = left.abs().max(right.abs());
        let coeff = if peak > self.level {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.level = coeff * self.level + (1.0 - coeff) * peak;

        self.attenuation = if self.level > self.threshold {
            (self.level / self.threshold).powf(1.0 / self.params.ratio - 1.0)
        } else {
            1.0
        };

        let gain = self.attenuation * self.makeup;
        (left * gain, right * gain)
    }
}

impl Effect for StereoCompressor {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        for frame in samples.chunks_exact_mut(2) {
            let (out_l, out_r) = self.process_sample(frame[0], frame[1]);
            frame[0] = out_l;
            frame[1] = out_r;
        }
    }

    fn reset(&mut self) {
        self.level = 0.0;
        self.attenuation = 1.0;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }
}
