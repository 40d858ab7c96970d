use tracing::{debug, warn};

use super::super::episode::Episode;
use super::store::{ProgressRecord, ProgressStore};

/// Where a new session starts, and whether the stored record is already completed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ResumePoint {
    pub(crate) offset: Option<f64>,
    pub(crate) completed: bool,
}

/// Resume offset for `episode` given its stored record, if playback should not start at zero.
pub(crate) fn resume_offset(
    record: Option<&ProgressRecord>,
    episode: &Episode,
    threshold_seconds: f64,
) -> Option<f64> {
    let record = record?;
    if record.completed {
        return None;
    }
    let position = record.position_seconds;
    if !position.is_finite() || position <= threshold_seconds {
        return None;
    }
    if episode.duration_seconds > 0.0 && position >= episode.duration_seconds {
        return None;
    }
    Some(episode.clamp_position(position))
}

pub(crate) fn locate_resume<S>(
    store: &S,
    profile_id: &str,
    episode: &Episode,
    threshold_seconds: f64,
) -> ResumePoint
where
    S: ProgressStore + ?Sized,
{
    let record = match store.fetch_progress(profile_id, &episode.episode_id) {
        Ok(record) => record,
        Err(err) => {
            warn!(
                episode_id = %episode.episode_id,
                error = %err,
                "progress lookup failed; starting from the beginning"
            );
            return ResumePoint::default();
        }
    };

    let offset = resume_offset(record.as_ref(), episode, threshold_seconds);
    debug!(
        episode_id = %episode.episode_id,
        found = record.is_some(),
        offset = ?offset,
        "resume lookup finished"
    );
    ResumePoint {
        offset,
        completed: record.is_some_and(|record| record.completed),
    }
}
