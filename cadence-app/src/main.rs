//! Cadence - live multi-device audio mixer
//!
//! Runs a set of synthetic capture cards on independent clocks through the
//! mixer, monitors the result on the default output device, and logs meter
//! readings. Press Enter to quit.

mod config;
mod monitor;
mod sink;

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cadence_audio::{AudioMixer, Bus, DeviceSpec, InputMapping};
use cadence_capture::{AudioTaskThread, CardHub, FakeCapture, FrameScheduler};

use config::AppConfig;
use sink::{format_levels, AppSink};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load();
    let config_path = AppConfig::config_path();
    info!(path = %config_path.display(), ?config, "configuration loaded");
    if !config_path.exists() {
        // First run: leave an editable copy of the defaults
        if let Err(e) = config.save() {
            debug!(error = %e, "could not write default configuration");
        }
    }
    if config.num_cards == 0 {
        anyhow::bail!("num_cards must be at least 1");
    }

    let mixer = Arc::new(AudioMixer::new(config.mixer_config()));
    let mapping = InputMapping::new(
        (0..config.num_cards)
            .map(|i| Bus::new(format!("Card {}", i + 1), DeviceSpec::capture_card(i), 0, 1))
            .collect(),
    );
    mixer
        .set_input_mapping(mapping)
        .context("invalid input mapping")?;

    // Monitor is optional; the mixer runs without it
    let (monitor, feed) = if config.monitor {
        match monitor::start_monitor(config.output_sample_rate) {
            Ok((monitor, feed)) => {
                info!(rate = monitor.sample_rate, "monitoring enabled");
                (Some(monitor), Some(feed))
            }
            Err(e) => {
                warn!(error = %e, "monitor unavailable");
                (None, None)
            }
        }
    } else {
        (None, None)
    };
    let app_sink = Arc::new(AppSink::new(feed));
    mixer.set_output_sink(app_sink.clone());

    let scheduler_config = config.scheduler_config();
    let hub = CardHub::new(mixer.clone(), config.num_cards, scheduler_config);
    for index in 0..config.num_cards {
        let card = FakeCapture::new(config.card_config(index));
        hub.attach_card(index, Box::new(card))
            .with_context(|| format!("failed to start card {}", index))?;
    }

    let (task_tx, task_rx) = crossbeam_channel::unbounded();
    let mut audio_thread = AudioTaskThread::spawn(mixer.clone(), task_rx)?;
    let scheduler = FrameScheduler::new(hub.clone(), config.master_card, task_tx, scheduler_config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let scheduler_handle = scheduler.spawn(shutdown.clone())?;

    let shutdown_input = shutdown.clone();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            shutdown_input.store(true, Ordering::SeqCst);
        })
        .context("failed to spawn stdin thread")?;

    info!(cards = config.num_cards, master = config.master_card, "running, press Enter to quit");
    run_level_log(&config, &hub, &app_sink, &shutdown);

    // Cleanup
    shutdown.store(true, Ordering::SeqCst);
    let _ = scheduler_handle.join();
    hub.stop_all();
    audio_thread.stop();
    drop(monitor);

    for index in 0..config.num_cards {
        if let Some(metrics) = hub.metrics(index) {
            info!(card = index, ?metrics, "card summary");
        }
    }
    Ok(())
}

fn run_level_log(config: &AppConfig, hub: &CardHub, sink: &AppSink, shutdown: &AtomicBool) {
    let mut last_log = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(50));
        if last_log.elapsed() < config.level_log_interval {
            continue;
        }
        last_log = Instant::now();

        if let Some(levels) = sink.take_levels() {
            info!("{}", format_levels(&levels));
        }
        for index in 0..hub.num_cards() {
            if let Some(metrics) = hub.metrics(index) {
                debug!(
                    card = index,
                    safe_queue_length = metrics.safe_queue_length,
                    starved = metrics.starved_frames,
                    jitter_dropped = metrics.jitter_dropped_frames,
                    lost = metrics.lost_frames,
                    "card queue"
                );
            }
        }
        let dropped = sink.dropped_samples();
        if dropped > 0 {
            debug!(dropped, "monitor buffer overflow");
        }
    }
}
