//! Stereo inter-channel correlation
//!
//! Both channels are band-limited by a one-pole low-pass, then the products
//! `LL`, `RR` and `LR` are smoothed with a short falloff. The result is
//! `LR / sqrt(LL * RR)`, in -1..=1.

use std::f32::consts::PI;

const LOWPASS_CUTOFF_HZ: f32 = 1000.0;
const FALLOFF_SECONDS: f32 = 0.1;

pub struct CorrelationMeasurer {
    w1: f32,
    w2: f32,
    zl: f32,
    zr: f32,
    zll: f32,
    zrr: f32,
    zlr: f32,
}

impl CorrelationMeasurer {
    pub fn new(sample_rate: u32) -> Self {
        let fs = sample_rate as f32;
        Self {
            w1: 2.0 * PI * LOWPASS_CUTOFF_HZ / fs,
            w2: 1.0 / (FALLOFF_SECONDS * fs),
            zl: 0.0,
            zr: 0.0,
            zll: 0.0,
            zrr: 0.0,
            zlr: 0.0,
        }
    }

    /// Feed stereo interleaved samples
    pub fn process(&mut self, samples: &[f32]) {
        for frame in samples.chunks_exact(2) {
            self.zl += self.w1 * (frame[0] - self.zl) + 1e-20;
            self.zr += self.w1 * (frame[1] - self.zr) + 1e-20;

            self.zll += self.w2 * (self.zl * self.zl - self.zll);
            self.zrr += self.w2 * (self.zr * self.zr - self.zrr);
            self.zlr += self.w2 * (self.zl * self.zr - self.zlr);
        }
    }

    /// Current correlation; silence reads as 0
    pub fn correlation(&self) -> f32 {
        let denom = (self.zll * self.zrr).sqrt();
        if denom < 1e-12 {
            return 0.0;
        }
        (self.zlr / denom).clamp(-1.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.zl = 0.0;
        self.zr = 0.0;
        self.zll = 0.0;
        self.zrr = 0.0;
        self.zlr = 0.0;
    }
}
