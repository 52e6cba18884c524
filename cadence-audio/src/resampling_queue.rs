//! Per-device resampling queue
//!
//! Every capture device runs on its own sample clock and delivers audio in
//! bursts whenever its driver feels like it. The queue buffers that input and
//! hands out exactly the number of frames the output clock asks for, steering
//! the resampling ratio so the amount of buffered audio stays near a target.
//!
//! The queue never fails and never blocks: when it runs dry it pads with
//! silence, when it is grossly over-full it throws away its oldest input.

use std::collections::VecDeque;

use rubato::{
    Resampler, ResamplerConstructionError, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

/// Whether a request for output may be used to steer the resampling ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateAdjustmentPolicy {
    /// Normal frames: nudge the ratio toward the target fill level
    AdjustRate,
    /// Backfilled frames whose timing says nothing about arrival jitter
    DoNotAdjustRate,
}

/// Output frames produced per resampler call
const CHUNK_FRAMES: usize = 64;
/// Largest relative ratio the resampler is built to accept
const MAX_RELATIVE_RATIO: f64 = 1.05;
/// Relative ratio correction per second of fill error
const CORRECTION_PER_SECOND: f64 = 0.2;
/// Ceiling on the applied correction (2%)
const MAX_CORRECTION: f64 = 0.02;
/// One-pole smoothing of the fill error, per output request
const ERROR_SMOOTHING: f64 = 0.05;
/// Only every Nth underrun is logged
const UNDERRUN_LOG_INTERVAL: u64 = 100;

/// Jitter buffer plus drift-correcting resampler for one device
pub struct ResamplingQueue {
    name: String,
    num_channels: usize,
    freq_in: u32,
    freq_out: u32,
    resampler: SincFixedOut<f32>,

    // Planar input awaiting resampling, and resampled output not yet handed out
    input: Vec<VecDeque<f32>>,
    output: Vec<VecDeque<f32>>,
    // Scratch for one resampler call
    chunk: Vec<Vec<f32>>,

    target_delay: f64,
    max_delay: f64,
    primed: bool,
    smoothed_error: f64,
    relative_ratio: f64,

    last_input_pts: Option<f64>,
    last_output_pts: Option<f64>,
    underruns: u64,
}

impl ResamplingQueue {
    /// Create a queue resampling `num_channels` channels from `freq_in` to `freq_out`
    pub fn new(
        name: impl Into<String>,
        freq_in: u32,
        freq_out: u32,
        num_channels: usize,
        target_delay_seconds: f64,
        max_delay_seconds: f64,
    ) -> Result<Self, ResamplerConstructionError> {
        let params = SincInterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.95,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedOut::<f32>::new(
            freq_out as f64 / freq_in as f64,
            MAX_RELATIVE_RATIO,
            params,
            CHUNK_FRAMES,
            num_channels,
        )?;

        Ok(Self {
            name: name.into(),
            num_channels,
            freq_in,
            freq_out,
            resampler,
            input: vec![VecDeque::new(); num_channels],
            output: vec![VecDeque::with_capacity(CHUNK_FRAMES * 2); num_channels],
            chunk: vec![Vec::new(); num_channels],
            target_delay: target_delay_seconds,
            max_delay: max_delay_seconds.max(target_delay_seconds * 2.0),
            primed: false,
            smoothed_error: 0.0,
            relative_ratio: 1.0,
            last_input_pts: None,
            last_output_pts: None,
            underruns: 0,
        })
    }

    /// Number of channels this queue carries
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Input frames waiting to be resampled
    pub fn buffered_input_frames(&self) -> usize {
        self.input.first().map_or(0, VecDeque::len)
    }

    /// Current relative resampling ratio (1.0 = nominal)
    pub fn relative_ratio(&self) -> f64 {
        self.relative_ratio
    }

    /// Underruns since creation
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Buffered audio in seconds, counting both sides of the resampler
    fn delay_seconds(&self) -> f64 {
        let out = self.output.first().map_or(0, VecDeque::len);
        self.buffered_input_frames() as f64 / self.freq_in as f64 + out as f64 / self.freq_out as f64
    }

    /// Append planar input samples stamped with the device's local clock
    ///
    /// Missing channels in `samples` are filled with silence.
    pub fn add_input_samples(&mut self, local_pts_seconds: f64, samples: &[Vec<f32>], num_frames: usize) {
        if let Some(last) = self.last_input_pts {
            if local_pts_seconds < last {
                debug!(queue = %self.name, last, local_pts_seconds, "input pts went backwards");
            }
        }
        self.last_input_pts = Some(local_pts_seconds);

        for (channel, input) in self.input.iter_mut().enumerate() {
            match samples.get(channel) {
                Some(src) => {
                    let n = num_frames.min(src.len());
                    input.extend(&src[..n]);
                    input.extend(std::iter::repeat(0.0).take(num_frames - n));
                }
                None => input.extend(std::iter::repeat(0.0).take(num_frames)),
            }
        }
    }

    /// Fill `dst` with `num_frames` interleaved frames for output time `pts_seconds`
    ///
    /// Always succeeds; `dst` must hold `num_frames * num_channels()` samples.
    pub fn get_output_samples(
        &mut self,
        pts_seconds: f64,
        dst: &mut [f32],
        num_frames: usize,
        policy: RateAdjustmentPolicy,
    ) {
        let dst = &mut dst[..num_frames * self.num_channels];
        if let Some(last) = self.last_output_pts {
            if pts_seconds < last {
                debug!(queue = %self.name, last, pts_seconds, "output pts went backwards");
            }
        }
        self.last_output_pts = Some(pts_seconds);

        if !self.primed {
            if self.delay_seconds() < self.target_delay {
                dst.fill(0.0);
                return;
            }
            self.primed = true;
            debug!(queue = %self.name, delay = self.delay_seconds(), "resampling queue primed");
        }

        let delay = self.delay_seconds();
        if delay > self.max_delay {
            let excess = ((delay - self.target_delay) * self.freq_in as f64) as usize;
            let excess = excess.min(self.buffered_input_frames());
            for input in &mut self.input {
                input.drain(..excess);
            }
            self.smoothed_error = 0.0;
            warn!(
                queue = %self.name,
                delay_ms = delay * 1000.0,
                dropped_frames = excess,
                "resampling queue over-full, discarding oldest input"
            );
        }

        if policy == RateAdjustmentPolicy::AdjustRate {
            self.adjust_rate();
        }

        let mut underrun = false;
        while self.output[0].len() < num_frames {
            let needed = self.resampler.input_frames_next();
            let take = needed.min(self.buffered_input_frames());
            if take < needed {
                underrun = true;
            }
            for (chunk, input) in self.chunk.iter_mut().zip(&mut self.input) {
                chunk.clear();
                chunk.extend(input.drain(..take));
                chunk.resize(needed, 0.0);
            }
            match self.resampler.process(&self.chunk, None) {
                Ok(resampled) => {
                    for (output, channel) in self.output.iter_mut().zip(resampled) {
                        output.extend(channel);
                    }
                }
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "resampler failed, emitting silence");
                    for output in &mut self.output {
                        let missing = num_frames.saturating_sub(output.len());
                        output.extend(std::iter::repeat(0.0).take(missing));
                    }
                }
            }
        }

        for frame in dst.chunks_exact_mut(self.num_channels) {
            for (sample, output) in frame.iter_mut().zip(&mut self.output) {
                *sample = output.pop_front().unwrap_or(0.0);
            }
        }

        if underrun {
            self.underruns += 1;
            // Rebuild the cushion before consuming again.
            self.primed = false;
            self.smoothed_error = 0.0;
            if self.underruns % UNDERRUN_LOG_INTERVAL == 1 {
                warn!(queue = %self.name, underruns = self.underruns, "resampling queue ran dry, padded with silence");
            }
        }
    }

    fn adjust_rate(&mut self) {
        let error = self.delay_seconds() - self.target_delay;
        self.smoothed_error += ERROR_SMOOTHING * (error - self.smoothed_error);

        // Too much buffered means the device clock runs fast: consume input
        // faster by lowering the output/input ratio.
        let correction = (-CORRECTION_PER_SECOND * self.smoothed_error).clamp(-MAX_CORRECTION, MAX_CORRECTION);
        let ratio = 1.0 + correction;
        if (ratio - self.relative_ratio).abs() > 1e-7 {
            match self.resampler.set_resample_ratio_relative(ratio, true) {
                Ok(()) => self.relative_ratio = ratio,
                Err(e) => debug!(queue = %self.name, error = %e, ratio, "ratio change rejected"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(freq_in: u32) -> ResamplingQueue {
        ResamplingQueue::new("test", freq_in, 48000, 2, 0.02, 0.5).unwrap()
    }

    fn constant(value: f32, frames: usize) -> Vec<Vec<f32>> {
        vec![vec![value; frames], vec![-value; frames]]
    }

    #[test]
    fn test_silence_until_primed() {
        let mut q = queue(48000);
        q.add_input_samples(0.0, &constant(0.5, 480), 480);

        let mut dst = vec![1.0; 960];
        q.get_output_samples(0.0, &mut dst, 480, RateAdjustmentPolicy::AdjustRate);
        assert!(dst.iter().all(|&s| s == 0.0));
        assert_eq!(q.buffered_input_frames(), 480, "priming must not consume");
    }

    #[test]
    fn test_always_fills_request_when_starved() {
        let mut q = queue(48000);
        let mut dst = vec![f32::NAN; 2 * 1000];
        q.get_output_samples(0.0, &mut dst, 1000, RateAdjustmentPolicy::AdjustRate);
        assert!(dst.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_passes_dc_through_at_same_rate() {
        let mut q = queue(48000);
        let mut dst = vec![0.0; 2 * 480];
        for i in 0..40 {
            q.add_input_samples(i as f64 * 0.01, &constant(0.25, 480), 480);
            q.get_output_samples(i as f64 * 0.01, &mut dst, 480, RateAdjustmentPolicy::DoNotAdjustRate);
        }
        // Well past the filter transient, the DC level survives resampling.
        for frame in dst.chunks_exact(2) {
            assert!((frame[0] - 0.25).abs() < 0.01, "left {}", frame[0]);
            assert!((frame[1] + 0.25).abs() < 0.01, "right {}", frame[1]);
        }
    }

    #[test]
    fn test_fast_device_lowers_ratio() {
        // Device delivers 1% more samples than the output consumes.
        let mut q = queue(48000);
        let mut dst = vec![0.0; 2 * 480];
        for i in 0..200 {
            q.add_input_samples(i as f64 * 0.01, &constant(0.1, 485), 485);
            q.get_output_samples(i as f64 * 0.01, &mut dst, 480, RateAdjustmentPolicy::AdjustRate);
        }
        assert!(q.relative_ratio() < 1.0, "ratio {}", q.relative_ratio());
    }

    #[test]
    fn test_fixed_policy_holds_ratio() {
        let mut q = queue(48000);
        let mut dst = vec![0.0; 2 * 480];
        for i in 0..100 {
            q.add_input_samples(i as f64 * 0.01, &constant(0.1, 500), 500);
            q.get_output_samples(i as f64 * 0.01, &mut dst, 480, RateAdjustmentPolicy::DoNotAdjustRate);
        }
        assert_eq!(q.relative_ratio(), 1.0);
    }

    #[test]
    fn test_overfull_queue_discards_oldest() {
        let mut q = queue(48000);
        q.add_input_samples(0.0, &constant(0.1, 48000), 48000);
        let mut dst = vec![0.0; 2 * 480];
        q.get_output_samples(0.0, &mut dst, 480, RateAdjustmentPolicy::AdjustRate);
        assert!(
            q.buffered_input_frames() < 2400,
            "expected trim to roughly the target delay, {} frames left",
            q.buffered_input_frames()
        );
    }

    #[test]
    fn test_resamples_between_rates() {
        let mut q = queue(44100);
        let mut dst = vec![0.0; 2 * 480];
        for i in 0..50 {
            q.add_input_samples(i as f64 * 0.01, &constant(0.5, 441), 441);
            q.get_output_samples(i as f64 * 0.01, &mut dst, 480, RateAdjustmentPolicy::AdjustRate);
        }
        assert_eq!(q.underruns(), 0);
        assert!((dst[0] - 0.5).abs() < 0.02, "left {}", dst[0]);
    }
}
