//! Master-clock pacing
//!
//! The scheduler thread waits for the master card, takes one frame from every
//! card, and queues the matching audio work for the audio task thread. Frames
//! the master lost are backfilled with audio tasks that do not steer the
//! resamplers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use cadence_audio::{RateAdjustmentPolicy, TIMEBASE};

use crate::card::CaptureDevice;
use crate::error::CaptureError;
use crate::fake_card::{FakeCapture, FakeCaptureConfig};
use crate::hub::{CardHub, MasterWait, QueuedFrame};
use crate::queue_policy::QueuePolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Highest frame rate any card may run at; gaps over two seconds of it reset
    pub max_fps: u32,
    pub queue_policy: QueuePolicyConfig,
    /// How long one tick waits for the master card
    pub master_timeout: Duration,
    /// Placeholder used for cards that disconnect
    pub fake_card: FakeCaptureConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_fps: 60,
            queue_policy: QueuePolicyConfig::default(),
            master_timeout: Duration::from_millis(100),
            fake_card: FakeCaptureConfig::default(),
        }
    }
}

/// One request for mixed audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTask {
    pub pts: i64,
    pub num_samples: usize,
    /// False for backfilled frames
    pub adjust_rate: bool,
}

impl AudioTask {
    pub fn rate_policy(&self) -> RateAdjustmentPolicy {
        if self.adjust_rate {
            RateAdjustmentPolicy::AdjustRate
        } else {
            RateAdjustmentPolicy::DoNotAdjustRate
        }
    }
}

/// What one scheduler tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// An output frame at `pts`, with whatever each card delivered for it
    Frame {
        pts: i64,
        frames: Vec<Option<QueuedFrame>>,
    },
    /// The master frame was corrupt; time moved on, nothing else happened
    SkippedCorrupt { pts: i64 },
    /// The master card went away and was replaced by a placeholder
    MasterReplaced,
    /// No master frame within the timeout
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames: u64,
    pub dropped_master_frames: u64,
    pub corrupt_master_frames: u64,
}

pub type HotplugEvent = (usize, Box<dyn CaptureDevice>);

pub struct FrameScheduler {
    hub: Arc<CardHub>,
    config: SchedulerConfig,
    master_card: usize,
    output_rate: u32,
    pts: i64,
    fractional_samples: i64,
    tasks: Sender<AudioTask>,
    hotplug_tx: Sender<HotplugEvent>,
    hotplug_rx: Receiver<HotplugEvent>,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(
        hub: Arc<CardHub>,
        master_card: usize,
        tasks: Sender<AudioTask>,
        config: SchedulerConfig,
    ) -> Result<Self, CaptureError> {
        let num_cards = hub.num_cards();
        if master_card >= num_cards {
            return Err(CaptureError::NoSuchCard {
                index: master_card,
                num_cards,
            });
        }
        let output_rate = hub.mixer().config().output_sample_rate;
        let (hotplug_tx, hotplug_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            hub,
            config,
            master_card,
            output_rate,
            pts: 0,
            fractional_samples: 0,
            tasks,
            hotplug_tx,
            hotplug_rx,
            stats: SchedulerStats::default(),
        })
    }

    /// Cards sent here are attached between ticks
    pub fn hotplug_sender(&self) -> Sender<HotplugEvent> {
        self.hotplug_tx.clone()
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Output samples for a frame of `length` ticks, carrying the remainder
    fn next_num_samples(&mut self, length: i64) -> usize {
        let samples_times_timebase = i64::from(self.output_rate) * length + self.fractional_samples;
        self.fractional_samples = samples_times_timebase % TIMEBASE;
        (samples_times_timebase / TIMEBASE) as usize
    }

    fn schedule_audio_tasks(&mut self, dropped_frames: u32, length: i64) {
        for frame_num in 0..=dropped_frames {
            let backfill = frame_num != dropped_frames;
            let task = AudioTask {
                pts: self.pts,
                num_samples: self.next_num_samples(length),
                adjust_rate: !backfill,
            };
            if self.tasks.send(task).is_err() {
                debug!("audio task queue closed");
            }
            if backfill {
                self.pts += length;
            }
        }
    }

    fn handle_hotplugged_cards(&mut self) {
        while let Ok((index, device)) = self.hotplug_rx.try_recv() {
            if let Err(e) = self.hub.attach_card(index, device) {
                warn!(card = index, error = %e, "could not attach hotplugged card");
            }
        }
    }

    fn replace_with_fake(&self, index: usize) {
        let fake = FakeCapture::new(self.config.fake_card);
        match self.hub.attach_card(index, Box::new(fake)) {
            Ok(()) => warn!(card = index, "card replaced by placeholder"),
            Err(e) => warn!(card = index, error = %e, "could not start placeholder card"),
        }
    }

    /// Run one output frame
    pub fn tick(&mut self) -> TickOutcome {
        self.handle_hotplugged_cards();

        let mut frames = match self
            .hub
            .get_one_frame_from_each_card(self.master_card, self.config.master_timeout)
        {
            MasterWait::Frames(frames) => frames,
            MasterWait::Disconnected => {
                warn!(card = self.master_card, "master card disconnected");
                self.replace_with_fake(self.master_card);
                return TickOutcome::MasterReplaced;
            }
            MasterWait::TimedOut => return TickOutcome::TimedOut,
        };

        for (index, frame) in frames.iter_mut().enumerate() {
            if index == self.master_card {
                continue;
            }
            if let Some(frame) = frame {
                if frame.is_empty() {
                    frame.dropped_frames += 1;
                }
                if frame.dropped_frames > 0 {
                    debug!(card = index, dropped_frames = frame.dropped_frames, "card dropped frames before this one");
                }
            }
        }

        let Some((dropped_frames, length, corrupt)) = frames
            .get(self.master_card)
            .and_then(Option::as_ref)
            .map(|f| (f.dropped_frames, f.length, f.is_empty()))
        else {
            return TickOutcome::TimedOut;
        };

        if corrupt {
            self.stats.corrupt_master_frames += 1;
            let pts = self.pts;
            self.pts += length;
            return TickOutcome::SkippedCorrupt { pts };
        }

        if dropped_frames > 0 {
            self.stats.dropped_master_frames += u64::from(dropped_frames);
            warn!(card = self.master_card, dropped_frames, "master card dropped frames, backfilling audio");
        }
        self.schedule_audio_tasks(dropped_frames, length);
        let pts = self.pts;
        self.pts += length;
        self.stats.frames += 1;

        for index in self.hub.disconnected_cards() {
            if index != self.master_card {
                self.replace_with_fake(index);
            }
        }

        TickOutcome::Frame { pts, frames }
    }

    /// Tick until `shutdown` is set
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(master = self.master_card, cards = self.hub.num_cards(), "scheduler started");
        while !shutdown.load(Ordering::Relaxed) {
            self.tick();
        }
        info!(
            frames = self.stats.frames,
            dropped = self.stats.dropped_master_frames,
            corrupt = self.stats.corrupt_master_frames,
            "scheduler stopped"
        );
    }

    pub fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<JoinHandle<()>, CaptureError> {
        thread::Builder::new()
            .name("frame-scheduler".to_string())
            .spawn(move || self.run(shutdown))
            .map_err(|source| CaptureError::Spawn {
                name: "frame-scheduler".to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::FrameSink;
    use crate::hub::tests::{frame, two_card_mixer, FRAME_LENGTH, FRAME_SAMPLES};
    use cadence_audio::{AudioMixer, DeviceSpec};

    fn setup() -> (Arc<AudioMixer>, Arc<CardHub>, FrameScheduler, Receiver<AudioTask>) {
        let mixer = two_card_mixer();
        let config = SchedulerConfig {
            master_timeout: Duration::from_millis(50),
            ..SchedulerConfig::default()
        };
        let hub = CardHub::new(mixer.clone(), 2, config);
        let (tx, rx) = crossbeam_channel::unbounded();
        let scheduler = FrameScheduler::new(hub.clone(), 0, tx, config).unwrap();
        (mixer, hub, scheduler, rx)
    }

    fn frame_pts(outcome: TickOutcome) -> i64 {
        match outcome {
            TickOutcome::Frame { pts, .. } => pts,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_missing_master() {
        let mixer = two_card_mixer();
        let hub = CardHub::new(mixer, 2, SchedulerConfig::default());
        let (tx, _rx) = crossbeam_channel::unbounded();
        assert!(matches!(
            FrameScheduler::new(hub, 2, tx, SchedulerConfig::default()),
            Err(CaptureError::NoSuchCard { index: 2, num_cards: 2 })
        ));
    }

    #[test]
    fn test_master_drop_backfills_and_starves_other_card() {
        let (mixer, hub, mut scheduler, tasks) = setup();
        let master = DeviceSpec::capture_card(0);

        // Card 1 starts one frame ahead
        hub.emit_frame(0, frame(0));
        hub.emit_frame(1, frame(0));
        hub.emit_frame(1, frame(1));
        assert_eq!(frame_pts(scheduler.tick()), 0);

        hub.emit_frame(0, frame(1));
        assert_eq!(frame_pts(scheduler.tick()), FRAME_LENGTH);

        // Master loses frames 2, 3 and 4; card 1 delivers nothing meanwhile
        hub.emit_frame(0, frame(5));
        assert_eq!(hub.metrics(0).unwrap().lost_frames, 3);
        assert_eq!(mixer.device_local_pts(master), Some(6 * FRAME_LENGTH));
        assert_eq!(mixer.buffered_input_frames(master), Some(6 * FRAME_SAMPLES));

        assert_eq!(frame_pts(scheduler.tick()), 5 * FRAME_LENGTH);
        assert_eq!(scheduler.pts(), 6 * FRAME_LENGTH);
        assert_eq!(scheduler.stats().dropped_master_frames, 3);

        let tasks: Vec<AudioTask> = tasks.try_iter().collect();
        let expected: Vec<AudioTask> = (0..6)
            .map(|i| AudioTask {
                pts: i * FRAME_LENGTH,
                num_samples: FRAME_SAMPLES,
                adjust_rate: !(2..5).contains(&i),
            })
            .collect();
        assert_eq!(tasks, expected);
        assert_eq!(tasks[2].rate_policy(), RateAdjustmentPolicy::DoNotAdjustRate);

        // Card 1 had reached its safe point before starving: one more frame of buffer
        let metrics = hub.metrics(1).unwrap();
        assert_eq!(metrics.starved_frames, 1);
        assert_eq!(metrics.safe_queue_length, 2);
    }

    #[test]
    fn test_queue_trimmed_to_newest_frames() {
        let (_, hub, mut scheduler, _tasks) = setup();
        hub.emit_frame(0, frame(0));
        for timecode in 0..5 {
            hub.emit_frame(1, frame(timecode));
        }

        match scheduler.tick() {
            TickOutcome::Frame { frames, .. } => {
                assert_eq!(frames[1].as_ref().map(|f| f.timecode), Some(0));
            }
            other => panic!("expected a frame, got {:?}", other),
        }
        assert_eq!(hub.queue_length(1), Some(1));
        assert_eq!(hub.metrics(1).unwrap().jitter_dropped_frames, 3);

        hub.emit_frame(0, frame(1));
        match scheduler.tick() {
            TickOutcome::Frame { frames, .. } => {
                assert_eq!(frames[1].as_ref().map(|f| f.timecode), Some(4));
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_master_frame_only_advances_time() {
        let (_, hub, mut scheduler, tasks) = setup();
        let mut corrupt = frame(0);
        corrupt.video.truncate(10);
        hub.emit_frame(0, corrupt);

        assert!(matches!(scheduler.tick(), TickOutcome::SkippedCorrupt { pts: 0 }));
        assert_eq!(scheduler.pts(), FRAME_LENGTH);
        assert!(tasks.try_recv().is_err());
        assert_eq!(scheduler.stats().corrupt_master_frames, 1);
    }

    #[test]
    fn test_fractional_samples_do_not_drift() {
        let (_, _, mut scheduler, _) = setup();
        // 59.94 fps: 800.8 samples per frame
        let length = TIMEBASE * 1001 / 60000;
        let total: usize = (0..1000).map(|_| scheduler.next_num_samples(length)).sum();
        assert_eq!(total, 800_800);
    }

    #[test]
    fn test_times_out_without_master_frame() {
        let (_, hub, mut scheduler, _) = setup();
        hub.emit_frame(1, frame(0));
        assert!(matches!(scheduler.tick(), TickOutcome::TimedOut));
        assert_eq!(scheduler.pts(), 0);
    }

    #[test]
    fn test_disconnected_master_replaced_by_placeholder() {
        let (_, hub, mut scheduler, _) = setup();
        hub.emit_disconnect(0);
        assert!(matches!(scheduler.tick(), TickOutcome::MasterReplaced));
        assert_eq!(hub.description(0).as_deref(), Some("Fake card"));
        assert!(hub.disconnected_cards().is_empty());

        // The placeholder keeps the master clock running
        let mut got_frame = false;
        for _ in 0..20 {
            if let TickOutcome::Frame { .. } = scheduler.tick() {
                got_frame = true;
                break;
            }
        }
        hub.stop_all();
        assert!(got_frame);
    }

    #[test]
    fn test_hotplugged_card_attached_on_next_tick() {
        let (_, hub, mut scheduler, _) = setup();
        let config = FakeCaptureConfig {
            width: 16,
            height: 4,
            tone: Some((440.0, -20.0)),
            ..FakeCaptureConfig::default()
        };
        let card: Box<dyn CaptureDevice> = Box::new(FakeCapture::new(config));
        scheduler.hotplug_sender().send((1, card)).unwrap();

        hub.emit_frame(0, frame(0));
        scheduler.tick();
        assert_eq!(hub.description(1).as_deref(), Some("Fake card (440 Hz tone)"));
        hub.stop_all();
    }
}
