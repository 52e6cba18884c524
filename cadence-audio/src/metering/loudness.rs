//! ITU-R BS.1770 loudness meter
//!
//! Implements LUFS metering according to ITU-R BS.1770-4 / EBU R128:
//! - Momentary loudness (400ms window)
//! - Short-term loudness (3s window)
//! - Gated integrated loudness (program loudness)
//! - Loudness range (EBU Tech 3342)
//!
//! All accumulation is done in `f64`; the makeup-gain loop adapts over
//! minutes and is sensitive to drift.

use std::f64::consts::PI;

/// Reported value for silence / not yet measured
pub const SILENCE_LUFS: f64 = -70.0;

const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const INTEGRATED_RELATIVE_GATE_LU: f64 = -10.0;
const RANGE_RELATIVE_GATE_LU: f64 = -20.0;
const RANGE_LOW_PERCENTILE: f64 = 0.10;
const RANGE_HIGH_PERCENTILE: f64 = 0.95;

const HISTOGRAM_MAX_LUFS: f64 = 5.0;
const HISTOGRAM_BINS_PER_LU: f64 = 10.0;

const MOMENTARY_BLOCKS: usize = 4; // 400ms = 4 x 100ms blocks
const SHORT_TERM_BLOCKS: usize = 30; // 3s = 30 x 100ms blocks

/// Ring buffer of block energies
struct RingBuffer {
    buffer: Vec<f64>,
    write_pos: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
        }
    }

    fn push(&mut self, value: f64) {
        self.buffer[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        if self.len < self.buffer.len() {
            self.len += 1;
        }
    }

    fn is_full(&self) -> bool {
        self.len == self.buffer.len()
    }

    fn mean(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.buffer[..self.len].iter().sum::<f64>() / self.len as f64
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.len = 0;
    }
}

/// Histogram of gated measurements, 0.1 LU resolution
///
/// Fixed size, so the metering path never allocates after construction.
struct LoudnessHistogram {
    counts: Vec<u64>,
    energy: Vec<f64>,
}

impl LoudnessHistogram {
    fn new() -> Self {
        let bins = ((HISTOGRAM_MAX_LUFS - ABSOLUTE_GATE_LUFS) * HISTOGRAM_BINS_PER_LU) as usize;
        Self {
            counts: vec![0; bins],
            energy: vec![0.0; bins],
        }
    }

    /// Bin for a loudness value; `None` below the absolute gate
    fn bin(&self, lufs: f64) -> Option<usize> {
        if lufs.is_nan() || lufs <= ABSOLUTE_GATE_LUFS {
            return None;
        }
        let index = ((lufs - ABSOLUTE_GATE_LUFS) * HISTOGRAM_BINS_PER_LU) as usize;
        Some(index.min(self.counts.len() - 1))
    }

    fn bin_center(index: usize) -> f64 {
        ABSOLUTE_GATE_LUFS + (index as f64 + 0.5) / HISTOGRAM_BINS_PER_LU
    }

    fn add(&mut self, energy: f64) {
        if let Some(index) = self.bin(energy_to_lufs(energy)) {
            self.counts[index] += 1;
            self.energy[index] += energy;
        }
    }

    /// First bin at or above a gate
    fn gate_start(&self, gate_lufs: f64) -> usize {
        self.bin(gate_lufs).unwrap_or(0)
    }

    /// Mean energy of everything at or above `gate_lufs`
    fn gated_mean(&self, gate_lufs: f64) -> Option<f64> {
        let start = self.gate_start(gate_lufs);
        let count: u64 = self.counts[start..].iter().sum();
        if count == 0 {
            return None;
        }
        Some(self.energy[start..].iter().sum::<f64>() / count as f64)
    }

    /// Loudness at a percentile of the measurements from bin `start` up
    fn percentile(&self, start: usize, total: u64, fraction: f64) -> f64 {
        let rank = (fraction * (total - 1) as f64).round() as u64;
        let mut cumulative = 0;
        for (index, &count) in self.counts.iter().enumerate().skip(start) {
            cumulative += count;
            if cumulative > rank {
                return Self::bin_center(index);
            }
        }
        Self::bin_center(self.counts.len() - 1)
    }

    fn clear(&mut self) {
        self.counts.fill(0);
        self.energy.fill(0.0);
    }
}

/// Biquad coefficients (normalized, a0 = 1)
#[derive(Clone, Copy)]
struct Coeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Biquad filter state
#[derive(Default, Clone)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f64, c: &Coeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
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

#[inline]
fn energy_to_lufs(energy: f64) -> f64 {
    if energy > 0.0 {
        -0.691 + 10.0 * energy.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// ITU-R BS.1770 loudness meter (stereo)
pub struct LoudnessMeter {
    // K-weighting: pre-filter (high shelf) then RLB (high-pass)
    pre: Coeffs,
    rlb: Coeffs,
    pre_state: [BiquadState; 2],
    rlb_state: [BiquadState; 2],

    // Per-channel mean square accumulators for the current 100ms block
    block_sum: [f64; 2],
    block_sample_count: usize,
    block_size: usize,

    momentary_buffer: RingBuffer,
    short_term_buffer: RingBuffer,

    // Gating blocks (400ms, 75% overlap) and short-term values for LRA
    integrated_histogram: LoudnessHistogram,
    range_histogram: LoudnessHistogram,

    momentary_lufs: f64,
    short_term_lufs: f64,
}

impl LoudnessMeter {
    pub fn new(sample_rate: u32) -> Self {
        let (pre, rlb) = Self::k_weighting(sample_rate as f64);
        Self {
            pre,
            rlb,
            pre_state: Default::default(),
            rlb_state: Default::default(),
            block_sum: [0.0; 2],
            block_sample_count: 0,
            block_size: (sample_rate as usize / 10).max(1),
            momentary_buffer: RingBuffer::new(MOMENTARY_BLOCKS),
            short_term_buffer: RingBuffer::new(SHORT_TERM_BLOCKS),
            integrated_histogram: LoudnessHistogram::new(),
            range_histogram: LoudnessHistogram::new(),
            momentary_lufs: SILENCE_LUFS,
            short_term_lufs: SILENCE_LUFS,
        }
    }

    /// K-weighting filter coefficients according to ITU-R BS.1770
    fn k_weighting(fs: f64) -> (Coeffs, Coeffs) {
        if (fs - 48000.0).abs() < 1.0 {
            // Exact coefficients for 48kHz
            let pre = Coeffs {
                b0: 1.53512485958697,
                b1: -2.69169618940638,
                b2: 1.19839281085285,
                a1: -1.69065929318241,
                a2: 0.73248077421585,
            };
            let rlb = Coeffs {
                b0: 1.0,
                b1: -2.0,
                b2: 1.0,
                a1: -1.99004745483398,
                a2: 0.99007225036621,
            };
            return (pre, rlb);
        }

        // Other sample rates: high shelf + high-pass via bilinear transform
        let f0 = 1681.974450955533;
        let g = 3.999843853973347; // dB
        let q = 0.7071752369554196;

        let a = 10.0f64.powf(g / 40.0);
        let omega = 2.0 * PI * f0 / fs;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;
        let pre = Coeffs {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_omega)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha) / a0,
        };

        // High-pass at ~38Hz
        let f0 = 38.13547087602444;
        let q = 0.5003270373238773;
        let omega = 2.0 * PI * f0 / fs;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);

        let a0 = 1.0 + alpha;
        let rlb = Coeffs {
            b0: ((1.0 + cos_omega) / 2.0) / a0,
            b1: (-(1.0 + cos_omega)) / a0,
            b2: ((1.0 + cos_omega) / 2.0) / a0,
            a1: (-2.0 * cos_omega) / a0,
            a2: (1.0 - alpha) / a0,
        };
        (pre, rlb)
    }

    /// Momentary loudness (400ms) in LUFS
    pub fn momentary(&self) -> f64 {
        self.momentary_lufs
    }

    /// Short-term loudness (3s) in LUFS
    pub fn short_term(&self) -> f64 {
        self.short_term_lufs
    }

    /// Gated integrated loudness since the last reset
    pub fn integrated(&self) -> f64 {
        let Some(mean) = self.integrated_histogram.gated_mean(ABSOLUTE_GATE_LUFS) else {
            return SILENCE_LUFS;
        };
        let relative_gate = energy_to_lufs(mean) + INTEGRATED_RELATIVE_GATE_LU;
        self.integrated_histogram
            .gated_mean(relative_gate)
            .map_or(SILENCE_LUFS, |gated| energy_to_lufs(gated).max(SILENCE_LUFS))
    }

    /// Loudness range as `(low, high)` in LUFS (10th and 95th percentile)
    pub fn range(&self) -> (f64, f64) {
        let hist = &self.range_histogram;
        let Some(mean) = hist.gated_mean(ABSOLUTE_GATE_LUFS) else {
            return (SILENCE_LUFS, SILENCE_LUFS);
        };
        let start = hist.gate_start(energy_to_lufs(mean) + RANGE_RELATIVE_GATE_LU);
        let total: u64 = hist.counts[start..].iter().sum();
        if total == 0 {
            return (SILENCE_LUFS, SILENCE_LUFS);
        }
        (
            hist.percentile(start, total, RANGE_LOW_PERCENTILE),
            hist.percentile(start, total, RANGE_HIGH_PERCENTILE),
        )
    }

    /// Loudness range in LU
    pub fn loudness_range(&self) -> f64 {
        let (low, high) = self.range();
        high - low
    }

    /// Process audio samples (analysis only, stereo interleaved)
    pub fn process(&mut self, samples: &[f32]) {
        for frame in samples.chunks_exact(2) {
            for (channel, &sample) in frame.iter().enumerate() {
                let pre = self.pre_state[channel].process(sample as f64, &self.pre);
                let weighted = self.rlb_state[channel].process(pre, &self.rlb);
                self.block_sum[channel] += weighted * weighted;
            }
            self.block_sample_count += 1;

            if self.block_sample_count >= self.block_size {
                self.finish_block();
            }
        }
    }

    fn finish_block(&mut self) {
        // Channel weights are 1.0 for L/R: sum the per-channel mean squares
        let n = self.block_sample_count as f64;
        let energy = (self.block_sum[0] + self.block_sum[1]) / n;
        self.block_sum = [0.0; 2];
        self.block_sample_count = 0;

        self.momentary_buffer.push(energy);
        self.short_term_buffer.push(energy);

        let momentary = self.momentary_buffer.mean();
        let short_term = self.short_term_buffer.mean();
        self.momentary_lufs = energy_to_lufs(momentary).max(SILENCE_LUFS);
        self.short_term_lufs = energy_to_lufs(short_term).max(SILENCE_LUFS);

        if self.momentary_buffer.is_full() {
            self.integrated_histogram.add(momentary);
        }
        if self.short_term_buffer.is_full() {
            self.range_histogram.add(short_term);
        }
    }

    /// Reset all state, including integrated loudness and range
    pub fn reset(&mut self) {
        self.pre_state.iter_mut().for_each(BiquadState::reset);
        self.rlb_state.iter_mut().for_each(BiquadState::reset);
        self.block_sum = [0.0; 2];
        self.block_sample_count = 0;
        self.momentary_buffer.clear();
        self.short_term_buffer.clear();
        self.integrated_histogram.clear();
        self.range_histogram.clear();
        self.momentary_lufs = SILENCE_LUFS;
        self.short_term_lufs = SILENCE_LUFS;
    }
}
