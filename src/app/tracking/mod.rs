mod autoplay;
mod checkpoint;
mod controller;
mod resume;
mod segments;
mod session;
mod store;

use thiserror::Error;

#[cfg(test)]
pub(crate) use autoplay::*;
#[cfg(test)]
pub(crate) use checkpoint::*;
pub(crate) use controller::*;
#[cfg(test)]
pub(crate) use resume::*;
#[cfg(test)]
pub(crate) use segments::*;
pub(crate) use session::*;
pub(crate) use store::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ResolutionError {
    #[error("episode {0} not found")]
    NotFound(String),
    #[error("catalog unavailable: {0}")]
    Catalog(String),
}

#[derive(Debug, Error)]
pub(crate) enum PersistenceError {
    #[error("progress database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("progress request failed: {0}")]
    Http(String),
    #[error("failed to decode progress response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("playback failed: {0}")]
pub(crate) struct PlayerError(pub(crate) String);

/// Control surface of the media element. Position reports flow back as [`PlayerEvent`]s.
pub(crate) trait Player {
    fn load(&mut self, episode_id: &str, media_url: &str, duration_seconds: f64);
    fn seek_to(&mut self, seconds: f64);
    fn play(&mut self);
    fn pause(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlayerEvent {
    Progress {
        episode_id: String,
        played_seconds: f64,
    },
    Ended {
        episode_id: String,
    },
    Failed {
        episode_id: String,
        message: String,
    },
}
