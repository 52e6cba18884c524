//! 4x oversampled true-peak detector
//!
//! Polyphase windowed-sinc interpolator; only used for metering, so the
//! interpolated samples are never output.

use std::f64::consts::PI;

const OVERSAMPLING_FACTOR: usize = 4;
const TAPS_PER_PHASE: usize = 12;
const PROTOTYPE_LEN: usize = OVERSAMPLING_FACTOR * TAPS_PER_PHASE;

/// Polyphase coefficients: `[phase][tap]`, each phase normalized to unity DC gain
fn polyphase_coeffs() -> [[f32; TAPS_PER_PHASE]; OVERSAMPLING_FACTOR] {
    let center = (PROTOTYPE_LEN / 2) as f64;
    let mut coeffs = [[0.0f32; TAPS_PER_PHASE]; OVERSAMPLING_FACTOR];
    for (phase, row) in coeffs.iter_mut().enumerate() {
        let mut taps = [0.0f64; TAPS_PER_PHASE];
        for (tap, c) in taps.iter_mut().enumerate() {
            let n = (tap * OVERSAMPLING_FACTOR + phase) as f64;
            let x = (n - center) / OVERSAMPLING_FACTOR as f64;
            let sinc = if x == 0.0 { 1.0 } else { (PI * x).sin() / (PI * x) };
            // Blackman window
            let w = 2.0 * PI * n / PROTOTYPE_LEN as f64;
            let window = 0.42 - 0.5 * w.cos() + 0.08 * (2.0 * w).cos();
            *c = sinc * window;
        }
        let sum: f64 = taps.iter().sum();
        for (dst, c) in row.iter_mut().zip(taps) {
            *dst = (c / sum) as f32;
        }
    }
    coeffs
}

/// Stereo true-peak detector
pub struct TruePeakDetector {
    coeffs: [[f32; TAPS_PER_PHASE]; OVERSAMPLING_FACTOR],
    history_l: [f32; TAPS_PER_PHASE],
    history_r: [f32; TAPS_PER_PHASE],
    history_pos: usize,
}

impl Default for TruePeakDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TruePeakDetector {
    pub fn new() -> Self {
        Self {
            coeffs: polyphase_coeffs(),
            history_l: [0.0; TAPS_PER_PHASE],
            history_r: [0.0; TAPS_PER_PHASE],
            history_pos: 0,
        }
    }

    /// Maximum absolute amplitude across all oversampled points of a stereo pair
    #[inline]
    fn detect(&mut self, left: f32, right: f32) -> f32 {
        self.history_l[self.history_pos] = left;
        self.history_r[self.history_pos] = right;

        let mut max_peak: f32 = 0.0;
        for phase in &self.coeffs {
            let mut sum_l: f32 = 0.0;
            let mut sum_r: f32 = 0.0;
            for (tap, &coeff) in phase.iter().enumerate() {
                let hist_idx = (self.history_pos + TAPS_PER_PHASE - tap) % TAPS_PER_PHASE;
                sum_l += self.history_l[hist_idx] * coeff;
                sum_r += self.history_r[hist_idx] * coeff;
            }
            max_peak = max_peak.max(sum_l.abs()).max(sum_r.abs());
        }

        self.history_pos = (self.history_pos + 1) % TAPS_PER_PHASE;
        max_peak
    }

    /// Peak of a block of stereo interleaved samples (linear)
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        samples
            .chunks_exact(2)
            .fold(0.0f32, |peak, frame| peak.max(self.detect(frame[0], frame[1])))
    }

    pub fn reset(&mut self) {
        self.history_l.fill(0.0);
        self.history_r.fill(0.0);
        self.history_pos = 0;
    }
}
