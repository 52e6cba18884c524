//! Capture driver contract

use std::sync::Arc;

use cadence_audio::{AudioFormat, TIMEBASE};

use crate::error::CaptureError;

/// Video mode of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
    pub frame_rate_nom: u32,
    pub frame_rate_den: u32,
    pub has_signal: bool,
    pub is_connected: bool,
}

impl VideoFormat {
    /// Frame duration in TIMEBASE ticks, `None` for a zero frame rate
    pub fn frame_length(&self) -> Option<i64> {
        if self.frame_rate_nom == 0 || self.frame_rate_den == 0 {
            return None;
        }
        Some(TIMEBASE * i64::from(self.frame_rate_den) / i64::from(self.frame_rate_nom))
    }

    /// Payload size of a well-formed frame
    pub fn expected_size(&self) -> usize {
        self.stride * self.height as usize
    }
}

/// One frame as delivered by a capture driver
///
/// Audio and video payloads start at their offsets; the audio length in
/// samples follows from the payload size and `audio_format`.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Wraps at 16 bits
    pub timecode: u16,
    pub video: Vec<u8>,
    pub video_offset: usize,
    pub video_format: VideoFormat,
    pub audio: Vec<u8>,
    pub audio_offset: usize,
    pub audio_format: AudioFormat,
}

impl CapturedFrame {
    /// Whole audio frames in the payload
    pub fn num_audio_samples(&self) -> usize {
        let bytes_per_frame = self.audio_format.bytes_per_frame();
        if bytes_per_frame == 0 {
            return 0;
        }
        self.audio.len().saturating_sub(self.audio_offset) / bytes_per_frame
    }

    pub fn audio_payload(&self) -> &[u8] {
        self.audio.get(self.audio_offset..).unwrap_or(&[])
    }

    pub fn video_payload_len(&self) -> usize {
        self.video.len().saturating_sub(self.video_offset)
    }
}

/// Receiver of captured frames, called from the capture threads
pub trait FrameSink: Send + Sync {
    fn emit_frame(&self, card_index: usize, frame: CapturedFrame);

    /// The card went away; no further frames will arrive from it
    fn emit_disconnect(&self, card_index: usize);
}

/// A capture card driver
pub trait CaptureDevice: Send {
    /// Start delivering frames for `card_index` to `sink`
    fn start(&mut self, card_index: usize, sink: Arc<dyn FrameSink>) -> Result<(), CaptureError>;

    /// Stop delivering frames; returns once the capture thread is gone
    fn stop(&mut self);

    fn description(&self) -> String;
}
