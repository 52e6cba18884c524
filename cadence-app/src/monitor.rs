//! Monitor output through the default audio device

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{info, warn};

/// Seconds of mixed audio the monitor buffer holds
const MONITOR_BUFFER_SECONDS: u32 = 1;

/// Keeps the output stream alive; dropping it stops monitoring
pub struct Monitor {
    _stream: cpal::Stream,
    pub sample_rate: u32,
}

/// Producer side of the monitor buffer, fed from the audio task thread
pub struct MonitorFeed {
    producer: Mutex<HeapProd<f32>>,
}

impl MonitorFeed {
    /// Queue stereo interleaved samples; what doesn't fit is dropped
    pub fn push(&self, samples: &[f32]) -> usize {
        self.producer.lock().push_slice(samples)
    }
}

/// Open the default output device at `sample_rate`, fed through a ring buffer
pub fn start_monitor(sample_rate: u32) -> anyhow::Result<(Monitor, MonitorFeed)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no audio output device found"))?;

    let wanted = cpal::SampleRate(sample_rate);
    let supported = device
        .supported_output_configs()
        .context("failed to query output configs")?
        .find(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= wanted
                && c.max_sample_rate() >= wanted
        })
        .map(|c| c.with_sample_rate(wanted));
    let supported = match supported {
        Some(config) => config,
        None => {
            let fallback = device
                .default_output_config()
                .context("failed to get default output config")?;
            warn!(
                device_rate = fallback.sample_rate().0,
                mixer_rate = sample_rate,
                "output device cannot run at the mixer rate, monitor pitch will be off"
            );
            fallback
        }
    };

    let channels = supported.channels() as usize;
    let device_rate = supported.sample_rate().0;
    let capacity = (sample_rate * MONITOR_BUFFER_SECONDS * 2) as usize;
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

    let mut consumer: HeapCons<f32> = consumer;
    let mut stereo = Vec::new();
    let stream = device
        .build_output_stream(
            &supported.config(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                stereo.resize(frames * 2, 0.0);
                let got = consumer.pop_slice(&mut stereo);
                // Underrun: pad with silence
                stereo[got..].fill(0.0);

                for (out, frame) in data.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                    if channels == 1 {
                        out[0] = (frame[0] + frame[1]) * 0.5;
                    } else {
                        out[0] = frame[0];
                        out[1] = frame[1];
                        out[2..].fill(0.0);
                    }
                }
            },
            |err| warn!(error = %err, "monitor stream error"),
            None,
        )
        .context("failed to create monitor stream")?;
    stream.play().context("failed to start monitor stream")?;

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        rate = device_rate,
        channels,
        "monitor output started"
    );
    Ok((
        Monitor {
            _stream: stream,
            sample_rate: device_rate,
        },
        MonitorFeed {
            producer: Mutex::new(producer),
        },
    ))
}
