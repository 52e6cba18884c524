//! Frame intake for every capture card
//!
//! Capture threads hand their frames to the hub. Audio goes straight into the
//! mixer (with silence inserted for frames the card lost); video is queued
//! per card for the scheduler to pick up one frame per output tick.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use cadence_audio::{AudioMixer, DeviceSpec};

use crate::card::{CaptureDevice, CapturedFrame, FrameSink, VideoFormat};
use crate::error::CaptureError;
use crate::queue_policy::{QueueLengthPolicy, QueueObservation};
use crate::scheduler::SchedulerConfig;
use crate::timecode::TimecodeTracker;

/// Attempts at queueing inserted silence before giving up on it
const SILENCE_RETRIES: u32 = 100;

/// A frame waiting for the scheduler
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub timecode: u16,
    /// Empty when the captured picture was missing or malformed
    pub video: Vec<u8>,
    pub video_format: VideoFormat,
    /// Duration in TIMEBASE ticks
    pub length: i64,
    /// Frames the card lost right before this one
    pub dropped_frames: u32,
}

impl QueuedFrame {
    pub fn is_empty(&self) -> bool {
        self.video.is_empty()
    }
}

/// Per-card counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardMetrics {
    pub received_frames: u64,
    /// Lost per timecode; silence was inserted for each
    pub lost_frames: u64,
    pub resampler_resets: u64,
    pub implausible_audio_frames: u64,
    pub bad_video_frames: u64,
    /// Dropped from the head of the queue to bound latency
    pub jitter_dropped_frames: u64,
    pub starved_frames: u64,
    pub safe_queue_length: usize,
    pub has_signal: bool,
}

struct CardSlot {
    frames: VecDeque<QueuedFrame>,
    timecode: TimecodeTracker,
    disconnected: bool,
    policy: QueueLengthPolicy,
    metrics: CardMetrics,
    description: String,
}

/// Result of waiting for the master card
pub(crate) enum MasterWait {
    /// One entry per card; the master's is always present
    Frames(Vec<Option<QueuedFrame>>),
    Disconnected,
    TimedOut,
}

pub struct CardHub {
    mixer: Arc<AudioMixer>,
    config: SchedulerConfig,
    cards: Mutex<Vec<CardSlot>>,
    frames_changed: Condvar,
    devices: Mutex<Vec<Option<Box<dyn CaptureDevice>>>>,
}

impl CardHub {
    pub fn new(mixer: Arc<AudioMixer>, num_cards: usize, config: SchedulerConfig) -> Arc<Self> {
        let cards = (0..num_cards)
            .map(|_| CardSlot {
                frames: VecDeque::new(),
                timecode: TimecodeTracker::new(),
                disconnected: false,
                policy: QueueLengthPolicy::new(config.queue_policy),
                metrics: CardMetrics::default(),
                description: String::new(),
            })
            .collect();
        Arc::new(Self {
            mixer,
            config,
            cards: Mutex::new(cards),
            frames_changed: Condvar::new(),
            devices: Mutex::new((0..num_cards).map(|_| None).collect()),
        })
    }

    pub fn num_cards(&self) -> usize {
        self.cards.lock().len()
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    fn check_index(&self, index: usize) -> Result<(), CaptureError> {
        let num_cards = self.num_cards();
        if index >= num_cards {
            return Err(CaptureError::NoSuchCard { index, num_cards });
        }
        Ok(())
    }

    /// Put `device` in slot `index`, stopping whatever was there
    ///
    /// The card's queue, timecode history and queue policy start over, and
    /// its resampler is reset.
    pub fn attach_card(self: &Arc<Self>, index: usize, mut device: Box<dyn CaptureDevice>) -> Result<(), CaptureError> {
        self.check_index(index)?;
        let mut devices = self.devices.lock();
        if let Some(mut old) = devices[index].take() {
            old.stop();
        }

        let description = device.description();
        {
            let mut cards = self.cards.lock();
            let card = &mut cards[index];
            card.frames.clear();
            card.timecode.reset();
            card.disconnected = false;
            card.policy.reset();
            card.metrics.safe_queue_length = card.policy.safe_queue_length();
            card.description = description.clone();
        }
        self.mixer.reset_resampler(DeviceSpec::capture_card(index));

        let sink: Arc<dyn FrameSink> = self.clone();
        device.start(index, sink)?;
        info!(card = index, %description, "card attached");
        devices[index] = Some(device);
        Ok(())
    }

    /// Stop every attached card
    pub fn stop_all(&self) {
        let mut devices = self.devices.lock();
        for mut device in devices.iter_mut().filter_map(Option::take) {
            device.stop();
        }
    }

    pub fn description(&self, index: usize) -> Option<String> {
        self.cards.lock().get(index).map(|c| c.description.clone())
    }

    pub fn metrics(&self, index: usize) -> Option<CardMetrics> {
        self.cards.lock().get(index).map(|c| c.metrics.clone())
    }

    pub fn queue_length(&self, index: usize) -> Option<usize> {
        self.cards.lock().get(index).map(|c| c.frames.len())
    }

    pub fn disconnected_cards(&self) -> Vec<usize> {
        self.cards
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.disconnected)
            .map(|(i, _)| i)
            .collect()
    }

    fn ingest(&self, card_index: usize, frame: CapturedFrame) {
        let spec = DeviceSpec::capture_card(card_index);
        let Some(frame_length) = frame.video_format.frame_length() else {
            warn!(card = card_index, timecode = frame.timecode, "frame with zero frame rate, dropped");
            return;
        };
        let output_rate = self.mixer.config().output_sample_rate;
        let num_samples = frame.num_audio_samples();

        let dropped_frames = {
            let mut cards = self.cards.lock();
            let Some(card) = cards.get_mut(card_index) else {
                warn!(card = card_index, "frame from unknown card, dropped");
                return;
            };
            card.metrics.received_frames += 1;
            if card.metrics.has_signal != frame.video_format.has_signal {
                card.metrics.has_signal = frame.video_format.has_signal;
                info!(card = card_index, has_signal = card.metrics.has_signal, "signal changed");
            }

            if num_samples > output_rate as usize / 10 {
                card.metrics.implausible_audio_frames += 1;
                warn!(
                    card = card_index,
                    num_samples,
                    audio_len = frame.audio.len(),
                    audio_offset = frame.audio_offset,
                    timecode = frame.timecode,
                    "implausible audio length, dropping frame"
                );
                return;
            }

            let dropped = card.timecode.observe(frame.timecode);
            if dropped > 2 * self.config.max_fps {
                card.metrics.resampler_resets += 1;
            } else {
                card.metrics.lost_frames += u64::from(dropped);
            }
            dropped
        };

        let dropped_frames = if dropped_frames > 2 * self.config.max_fps {
            warn!(
                card = card_index,
                dropped_frames,
                timecode = frame.timecode,
                "lost more than two seconds, resetting resampler"
            );
            self.mixer.reset_resampler(spec);
            0
        } else {
            if dropped_frames > 0 {
                warn!(card = card_index, dropped_frames, timecode = frame.timecode, "dropped frames, inserting silence");
                self.insert_silence(spec, dropped_frames as usize, &frame.video_format, frame_length);
            }
            dropped_frames
        };

        if num_samples > 0
            && !self
                .mixer
                .add_audio(spec, frame.audio_payload(), num_samples, frame.audio_format, frame_length)
        {
            debug!(card = card_index, "mixer busy, audio chunk dropped");
        }

        let expected = frame.video_format.expected_size();
        let payload = frame.video_payload_len();
        let video = if payload == 0 || payload != expected {
            if payload != 0 {
                warn!(card = card_index, payload, expected, "video frame with wrong size, dropped");
            }
            Vec::new()
        } else {
            let mut video = frame.video;
            video.drain(..frame.video_offset);
            video
        };

        let mut cards = self.cards.lock();
        if let Some(card) = cards.get_mut(card_index) {
            if video.is_empty() && payload != 0 {
                card.metrics.bad_video_frames += 1;
            }
            card.frames.push_back(QueuedFrame {
                timecode: frame.timecode,
                video,
                video_format: frame.video_format,
                length: frame_length,
                dropped_frames,
            });
        }
        drop(cards);
        self.frames_changed.notify_all();
    }

    fn insert_silence(&self, spec: DeviceSpec, num_frames: usize, format: &VideoFormat, frame_length: i64) {
        // May be fractional per frame; the resampler absorbs the difference
        let samples_per_frame = (u64::from(self.mixer.config().output_sample_rate) * u64::from(format.frame_rate_den)
            / u64::from(format.frame_rate_nom)) as usize;
        for _ in 0..SILENCE_RETRIES {
            if self.mixer.add_silence(spec, samples_per_frame, num_frames, frame_length) {
                return;
            }
        }
        warn!(device = %spec, num_frames, "could not queue inserted silence");
    }

    /// Wait for the master card's next frame, then take one frame from every card
    ///
    /// Non-master cards feed their queue policy and get trimmed to their safe
    /// length.
    pub(crate) fn get_one_frame_from_each_card(&self, master: usize, timeout: Duration) -> MasterWait {
        let deadline = Instant::now() + timeout;
        let mut cards = self.cards.lock();
        loop {
            let Some(master_card) = cards.get(master) else {
                return MasterWait::TimedOut;
            };
            if !master_card.frames.is_empty() {
                break;
            }
            if master_card.disconnected {
                return MasterWait::Disconnected;
            }
            if self.frames_changed.wait_until(&mut cards, deadline).timed_out() {
                let has_frame = cards.get(master).is_some_and(|c| !c.frames.is_empty());
                if !has_frame {
                    return MasterWait::TimedOut;
                }
            }
        }

        let mut frames = Vec::with_capacity(cards.len());
        for (index, card) in cards.iter_mut().enumerate() {
            let frame = card.frames.pop_front();
            if index != master {
                let observation = match frame {
                    Some(_) => QueueObservation::Surplus(card.frames.len()),
                    None => {
                        card.metrics.starved_frames += 1;
                        QueueObservation::Starved
                    }
                };
                card.policy.update(observation);
                let safe = card.policy.safe_queue_length();
                let trimmed = trim_queue(&mut card.frames, safe);
                if trimmed > 0 {
                    debug!(card = index, trimmed, safe, "trimmed queue");
                }
                card.metrics.jitter_dropped_frames += trimmed;
                card.metrics.safe_queue_length = safe;
            }
            frames.push(frame);
        }
        MasterWait::Frames(frames)
    }
}

impl FrameSink for CardHub {
    fn emit_frame(&self, card_index: usize, frame: CapturedFrame) {
        self.ingest(card_index, frame);
    }

    fn emit_disconnect(&self, card_index: usize) {
        let mut cards = self.cards.lock();
        if let Some(card) = cards.get_mut(card_index) {
            card.disconnected = true;
            warn!(card = card_index, description = %card.description, "card disconnected");
        }
        drop(cards);
        self.frames_changed.notify_all();
    }
}

/// Drop frames from the head until the queue fits `safe_queue_length`
///
/// Frames the card lost before a queued frame count toward the length, since
/// they add latency all the same. Returns the number of frames dropped.
fn trim_queue(frames: &mut VecDeque<QueuedFrame>, safe_queue_length: usize) -> u64 {
    let mut queue_length: usize = frames.iter().map(|f| f.dropped_frames as usize + 1).sum();
    let mut dropped = 0;
    while queue_length > safe_queue_length {
        let Some(front) = frames.front() else {
            break;
        };
        queue_length -= front.dropped_frames as usize;
        if queue_length <= safe_queue_length {
            break;
        }
        frames.pop_front();
        queue_length -= 1;
        dropped += 1;
    }
    dropped
}
