//! Placeholder capture card
//!
//! Stands in for a card that is missing or was unplugged, so the rest of the
//! pipeline keeps its cadence. Produces a flat gray picture and silence, or a
//! sine tone when configured to (used for synthetic test sources).

use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use cadence_audio::{from_db, AudioFormat, SampleFormat, TIMEBASE};

use crate::card::{CaptureDevice, CapturedFrame, FrameSink, VideoFormat};
use crate::error::CaptureError;
use crate::sleeper::QuittableSleeper;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FakeCaptureConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate_nom: u32,
    pub frame_rate_den: u32,
    pub num_channels: usize,
    /// Actual sample clock of the fake card; differs from 48 kHz to simulate drift
    pub sample_rate: u32,
    /// Sine frequency and level (dBFS) on every channel, or silence
    pub tone: Option<(f32, f32)>,
}

impl Default for FakeCaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate_nom: 60,
            frame_rate_den: 1,
            num_channels: 2,
            sample_rate: 48_000,
            tone: None,
        }
    }
}

pub struct FakeCapture {
    config: FakeCaptureConfig,
    sleeper: Arc<QuittableSleeper>,
    card_index: Option<usize>,
    handle: Option<JoinHandle<()>>,
}

impl FakeCapture {
    pub fn new(config: FakeCaptureConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(QuittableSleeper::new()),
            card_index: None,
            handle: None,
        }
    }

    pub fn config(&self) -> &FakeCaptureConfig {
        &self.config
    }
}

impl CaptureDevice for FakeCapture {
    fn start(&mut self, card_index: usize, sink: Arc<dyn FrameSink>) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Err(CaptureError::AlreadyStarted(card_index));
        }
        self.sleeper.unquit();
        let config = self.config;
        let sleeper = self.sleeper.clone();
        let name = format!("fake-card-{}", card_index);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_fake_card(card_index, config, sink, &sleeper))
            .map_err(|source| CaptureError::Spawn { name, source })?;

        info!(card = card_index, fps = config.frame_rate_nom, "fake card started");
        self.card_index = Some(card_index);
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.sleeper.quit();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!(card = ?self.card_index, "fake card stopped");
        }
    }

    fn description(&self) -> String {
        match self.config.tone {
            Some((hz, _)) => format!("Fake card ({} Hz tone)", hz),
            None => "Fake card".to_string(),
        }
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_fake_card(
    card_index: usize,
    config: FakeCaptureConfig,
    sink: Arc<dyn FrameSink>,
    sleeper: &QuittableSleeper,
) {
    let video_format = VideoFormat {
        width: config.width,
        height: config.height,
        stride: config.width as usize * 2,
        frame_rate_nom: config.frame_rate_nom.max(1),
        frame_rate_den: config.frame_rate_den.max(1),
        has_signal: true,
        is_connected: true,
    };
    let audio_format = AudioFormat {
        sample_format: SampleFormat::S32,
        num_channels: config.num_channels.max(1),
    };
    let frame_length = video_format.frame_length().unwrap_or(TIMEBASE / 60);
    let frame_duration = Duration::from_nanos((frame_length * 1_000_000_000 / TIMEBASE) as u64);
    // Gray in 8-bit 4:2:2
    let picture = vec![0x80u8; video_format.expected_size()];

    let (phase_step, amplitude) = match config.tone {
        Some((hz, dbfs)) => (TAU * f64::from(hz) / f64::from(config.sample_rate), f64::from(from_db(dbfs))),
        None => (0.0, 0.0),
    };
    let mut phase = 0.0f64;
    let mut fractional_samples = 0i64;
    let mut timecode: u16 = 0;
    let mut next_frame = Instant::now();

    while !sleeper.should_quit() {
        let samples_times_timebase = i64::from(config.sample_rate) * frame_length + fractional_samples;
        let num_samples = (samples_times_timebase / TIMEBASE) as usize;
        fractional_samples = samples_times_timebase % TIMEBASE;

        let mut audio = Vec::with_capacity(num_samples * audio_format.bytes_per_frame());
        for _ in 0..num_samples {
            let value = (phase.sin() * amplitude * f64::from(i32::MAX)) as i32;
            phase = (phase + phase_step) % TAU;
            for _ in 0..audio_format.num_channels {
                audio.extend_from_slice(&value.to_le_bytes());
            }
        }

        sink.emit_frame(
            card_index,
            CapturedFrame {
                timecode,
                video: picture.clone(),
                video_offset: 0,
                video_format,
                audio,
                audio_offset: 0,
                audio_format,
            },
        );
        timecode = timecode.wrapping_add(1);

        next_frame += frame_duration;
        if !sleeper.sleep_until(next_frame) {
            break;
        }
    }
}
