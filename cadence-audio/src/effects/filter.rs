//! Stereo biquad filter (high-pass and shelving)
//!
//! Coefficients follow the RBJ Audio EQ Cookbook. Enabling and disabling
//! crossfades between the dry and filtered signal so toggling the locut on a
//! live bus does not click.

use super::Effect;
use std::f32::consts::PI;

/// Filter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    HighPass,
    LowShelf,
    HighShelf,
}

/// Biquad filter coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const UNITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };
}

/// Biquad filter state for a single channel
#[derive(Default, Clone)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let output = c.a0 * input + c.a1 * self.x1 + c.a2 * self.x2 - c.b1 * self.y1 - c.b2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Stereo biquad with click-free enable
pub struct StereoFilter {
    filter_type: FilterType,
    sample_rate: f32,
    cutoff: f32,
    resonance: f32,
    /// Shelf gain as a normalized exponent: linear amplitude `A = 10^gain`
    shelf_gain: f32,
    enabled: bool,

    coeffs: BiquadCoeffs,
    state_l: BiquadState,
    state_r: BiquadState,

    // Wet envelope for click-free enable/disable
    wet_target: f32,
    wet_current: f32,
}

impl StereoFilter {
    /// Wet envelope smoothing coefficient (~10ms at 48kHz)
    const WET_SMOOTH_COEFF: f32 = 0.9995;

    /// Create an enabled filter
    pub fn new(filter_type: FilterType, sample_rate: f32, cutoff: f32) -> Self {
        let mut filter = Self {
            filter_type,
            sample_rate,
            cutoff: cutoff.clamp(10.0, sample_rate * 0.45),
            resonance: std::f32::consts::FRAC_1_SQRT_2, // Butterworth Q
            shelf_gain: 0.0,
            enabled: true,
            coeffs: BiquadCoeffs::UNITY,
            state_l: BiquadState::default(),
            state_r: BiquadState::default(),
            wet_target: 1.0,
            wet_current: 1.0,
        };
        filter.calculate_coefficients();
        filter
    }

    /// Set cutoff frequency; recomputes only on change
    pub fn set_cutoff(&mut self, cutoff: f32) {
        let cutoff = cutoff.clamp(10.0, self.sample_rate * 0.45);
        if cutoff != self.cutoff {
            self.cutoff = cutoff;
            self.calculate_coefficients();
        }
    }

    /// Set shelf gain as a normalized exponent (`A = 10^gain`); recomputes only on change
    pub fn set_shelf_gain(&mut self, gain: f32) {
        if gain != self.shelf_gain {
            self.shelf_gain = gain;
            self.calculate_coefficients();
        }
    }

    fn calculate_coefficients(&mut self) {
        let omega = 2.0 * PI * self.cutoff / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();

        self.coeffs = match self.filter_type {
            FilterType::HighPass => {
                let alpha = sin_omega / (2.0 * self.resonance);
                let a0 = 1.0 + alpha;
                BiquadCoeffs {
                    a0: ((1.0 + cos_omega) / 2.0) / a0,
                    a1: (-(1.0 + cos_omega)) / a0,
                    a2: ((1.0 + cos_omega) / 2.0) / a0,
                    b1: (-2.0 * cos_omega) / a0,
                    b2: (1.0 - alpha) / a0,
                }
            }
            FilterType::LowShelf | FilterType::HighShelf if self.shelf_gain.abs() < 1e-6 => {
                BiquadCoeffs::UNITY
            }
            FilterType::LowShelf => {
                let a = 10.0f32.powf(self.shelf_gain);
                let alpha = sin_omega / 2.0 * 2.0f32.sqrt(); // Slope = 1
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;
                BiquadCoeffs {
                    a0: (a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
                    a1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
                    a2: (a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
                    b1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
                    b2: ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
                }
            }
            FilterType::HighShelf => {
                let a = 10.0f32.powf(self.shelf_gain);
                let alpha = sin_omega / 2.0 * 2.0f32.sqrt();
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;
                BiquadCoeffs {
                    a0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
                    a1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
                    a2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
                    b1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
                    b2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
                }
            }
        };
    }
}

impl Effect for StereoFilter {
    fn process(&mut self, samples: &mut [f32]) {
        // Skip processing only if fully disabled and envelope has settled
        if !self.enabled && self.wet_current < 0.0001 {
            return;
        }

        let settled = self.enabled && self.wet_current >= 0.9999;
        for frame in samples.chunks_exact_mut(2) {
            let wet_l = self.state_l.process(frame[0], &self.coeffs);
            let wet_r = self.state_r.process(frame[1], &self.coeffs);

            if settled {
                frame[0] = wet_l;
                frame[1] = wet_r;
                continue;
            }

            self.wet_current = Self::WET_SMOOTH_COEFF * self.wet_current
                + (1.0 - Self::WET_SMOOTH_COEFF) * self.wet_target;
            frame[0] = frame[0] * (1.0 - self.wet_current) + wet_l * self.wet_current;
            frame[1] = frame[1] * (1.0 - self.wet_current) + wet_r * self.wet_current;
        }
        if settled {
            self.wet_current = 1.0;
        }
    }

    fn reset(&mut self) {
        self.state_l.reset();
        self.state_r.reset();
        self.wet_current = self.wet_target;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.wet_target = if enabled { 1.0 } else { 0.0 };
        // Filter state keeps running through the fade-out
    }
}
