//! Per-bus channel strip: locut, EQ, dynamics, fader

use crate::config::{from_db, to_db, MixerConfig};
use crate::effects::{CompressorParams, Effect, FilterType, StereoCompressor, StereoFilter, ThreeBandEq};

/// Fader changes smaller than this are applied as a flat gain
const FADER_EPSILON_DB: f32 = 1e-3;

/// EQ band selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqBand {
    Bass,
    Mid,
    Treble,
}

impl EqBand {
    fn index(self) -> usize {
        match self {
            EqBand::Bass => 0,
            EqBand::Mid => 1,
            EqBand::Treble => 2,
        }
    }
}

/// Gain for sample `i` of `n` during a fade from `g0` to `g1` (linear)
#[inline]
pub(crate) fn fade_gain(g0: f32, g1: f32, i: usize, n: usize) -> f32 {
    if n == 0 || g0 <= 0.0 {
        return g1;
    }
    g0 * (g1 / g0).powf(i as f32 / n as f32)
}

pub(crate) struct BusState {
    pub locut: StereoFilter,
    pub eq: ThreeBandEq,
    pub eq_db: [f32; 3],
    pub level_compressor: StereoCompressor,
    pub compressor: StereoCompressor,
    pub compressor_threshold_dbfs: f32,
    pub gain_staging_db: f32,
    pub fader_volume_db: f32,
    pub last_fader_volume_db: f32,
    /// Stereo interleaved input for the frame being mixed
    pub input: Vec<f32>,
}

impl BusState {
    pub fn new(config: &MixerConfig) -> Self {
        let fs = config.output_sample_rate as f32;
        let threshold = config.default_compressor_threshold_dbfs();
        Self {
            locut: StereoFilter::new(FilterType::HighPass, fs, config.locut_cutoff_hz),
            eq: ThreeBandEq::new(fs),
            eq_db: [0.0; 3],
            level_compressor: StereoCompressor::new(fs, CompressorParams::level_compressor(config.ref_level_dbfs)),
            compressor: StereoCompressor::new(fs, CompressorParams::bus_compressor(threshold)),
            compressor_threshold_dbfs: threshold,
            gain_staging_db: 0.0,
            fader_volume_db: 0.0,
            last_fader_volume_db: 0.0,
            input: Vec::new(),
        }
    }

    pub fn eq(&self, band: EqBand) -> f32 {
        self.eq_db[band.index()]
    }

    pub fn set_eq(&mut self, band: EqBand, db: f32) {
        self.eq_db[band.index()] = db;
    }

    /// Locut, EQ and dynamics over `self.input`, in place
    pub fn process_strip(&mut self, locut_cutoff_hz: f32, ref_level_dbfs: f32) {
        let samples = &mut self.input;

        self.locut.set_cutoff(locut_cutoff_hz);
        self.locut.process(samples);

        let [bass, mid, treble] = self.eq_db;
        self.eq.process(samples, bass, mid, treble);

        if self.level_compressor.is_enabled() {
            self.level_compressor
                .set_params(CompressorParams::level_compressor(ref_level_dbfs));
            self.level_compressor.process(samples);
            // Keep the implied gain so switching to manual is seamless
            self.gain_staging_db =
                to_db(self.level_compressor.attenuation() * self.level_compressor.makeup());
        } else {
            let gain = from_db(self.gain_staging_db);
            for s in samples.iter_mut() {
                *s *= gain;
            }
        }

        self.compressor.set_threshold_dbfs(self.compressor_threshold_dbfs);
        self.compressor.process(samples);
    }

    /// Apply the fader and sum into `master`; returns post-fader peaks per channel
    ///
    /// With `assign` the bus overwrites `master` instead of adding to it.
    pub fn mix_into(&mut self, master: &mut [f32], assign: bool) -> [f32; 2] {
        let n = self.input.len() / 2;
        let g0 = from_db(self.last_fader_volume_db);
        let g1 = from_db(self.fader_volume_db);
        let fading = (self.fader_volume_db - self.last_fader_volume_db).abs() > FADER_EPSILON_DB;

        let mut peak = [0.0f32; 2];
        for (i, (dst, src)) in master
            .chunks_exact_mut(2)
            .zip(self.input.chunks_exact(2))
            .enumerate()
        {
            let gain = if fading { fade_gain(g0, g1, i, n) } else { g1 };
            for channel in 0..2 {
                let value = src[channel] * gain;
                peak[channel] = peak[channel].max(value.abs());
                if assign {
                    dst[channel] = value;
                } else {
                    dst[channel] += value;
                }
            }
        }

        self.last_fader_volume_db = self.fader_volume_db;
        peak
    }

    /// Current gain reduction of the bus compressor, for display
    pub fn compressor_attenuation_db(&self) -> f32 {
        self.compressor.gain_reduction_db()
    }
}
