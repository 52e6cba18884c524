//! Capture layer errors

use thiserror::Error;

use cadence_audio::ConfigError;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("card {index} does not exist (hub has {num_cards} cards)")]
    NoSuchCard { index: usize, num_cards: usize },

    #[error("card {0} is already running")]
    AlreadyStarted(usize),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
