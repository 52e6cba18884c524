//! Capture synchronization for Cadence
//!
//! - Card: the capture driver contract (`FrameSink`, `CaptureDevice`)
//! - Hub: per-card frame queues, timecode tracking, silence insertion
//! - Queue policy: adaptive safe queue length for non-master cards
//! - Scheduler: master-clock pacing and audio task scheduling
//! - Audio tasks: the thread that runs the mixer for each output frame

mod audio_task;
mod card;
mod error;
mod fake_card;
mod hub;
mod queue_policy;
mod scheduler;
mod sleeper;
mod timecode;

pub use audio_task::AudioTaskThread;
pub use card::{CaptureDevice, CapturedFrame, FrameSink, VideoFormat};
pub use error::CaptureError;
pub use fake_card::{FakeCapture, FakeCaptureConfig};
pub use hub::{CardHub, CardMetrics, QueuedFrame};
pub use queue_policy::{QueueLengthPolicy, QueueObservation, QueuePolicyConfig};
pub use scheduler::{AudioTask, FrameScheduler, HotplugEvent, SchedulerConfig, SchedulerStats, TickOutcome};
pub use sleeper::QuittableSleeper;
pub use timecode::{unwrap_timecode, TimecodeTracker};
