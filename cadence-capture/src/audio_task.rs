//! Audio task thread: turns scheduled audio tasks into mixed output

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use tracing::{debug, info};

use cadence_audio::AudioMixer;

use crate::error::CaptureError;
use crate::scheduler::AudioTask;

pub struct AudioTaskThread {
    quit_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AudioTaskThread {
    /// Start draining `tasks`; every task is mixed and handed to the mixer's output sink
    pub fn spawn(mixer: Arc<AudioMixer>, tasks: Receiver<AudioTask>) -> Result<Self, CaptureError> {
        let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("audio-tasks".to_string())
            .spawn(move || run_audio_tasks(&mixer, &tasks, &quit_rx))
            .map_err(|source| CaptureError::Spawn {
                name: "audio-tasks".to_string(),
                source,
            })?;
        Ok(Self {
            quit_tx: Some(quit_tx),
            handle: Some(handle),
        })
    }

    /// Stop immediately; queued tasks are left unprocessed
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread
        self.quit_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioTaskThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_audio_tasks(mixer: &AudioMixer, tasks: &Receiver<AudioTask>, quit: &Receiver<()>) {
    info!("audio task thread started");
    let mut processed: u64 = 0;
    loop {
        select! {
            recv(quit) -> _ => break,
            recv(tasks) -> task => {
                let Ok(task) = task else {
                    debug!("audio task queue closed");
                    break;
                };
                if quit.try_recv() != Err(TryRecvError::Empty) {
                    break;
                }
                process_task(mixer, task);
                processed += 1;
            }
        }
    }
    info!(processed, "audio task thread stopped");
}

fn process_task(mixer: &AudioMixer, task: AudioTask) {
    let samples = mixer.get_output(task.pts, task.num_samples, task.rate_policy());
    if let Some(sink) = mixer.output_sink() {
        sink.emit_frame(task.pts, &samples);
    }
}
