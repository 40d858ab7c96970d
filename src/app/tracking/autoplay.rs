use std::time::{Duration, Instant};

use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledAdvance {
    next_episode_id: String,
    due: Instant,
}

/// Schedules the delayed move to the next episode. Settles at most once per
/// session, so repeated end-of-stream signals never advance twice.
#[derive(Debug, Clone)]
pub(crate) struct AutoplayCoordinator {
    delay: Duration,
    scheduled: Option<ScheduledAdvance>,
    settled: bool,
}

impl AutoplayCoordinator {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            scheduled: None,
            settled: false,
        }
    }

    pub(crate) fn on_end_of_stream(&mut self, next_episode_id: Option<&str>, now: Instant) -> bool {
        if self.settled || self.scheduled.is_some() {
            return false;
        }
        let Some(next_episode_id) = next_episode_id else {
            info!("end of stream with no next episode");
            self.settled = true;
            return false;
        };
        info!(
            next_episode_id,
            delay_ms = self.delay.as_millis() as u64,
            "autoplay scheduled"
        );
        self.scheduled = Some(ScheduledAdvance {
            next_episode_id: next_episode_id.to_string(),
            due: now + self.delay,
        });
        true
    }

    pub(crate) fn cancel(&mut self) -> bool {
        let Some(scheduled) = self.scheduled.take() else {
            return false;
        };
        info!(next_episode_id = %scheduled.next_episode_id, "autoplay cancelled");
        self.settled = true;
        true
    }

    /// Returns the next episode id once the delay has elapsed.
    pub(crate) fn poll(&mut self, now: Instant) -> Option<String> {
        let due = self.scheduled.as_ref()?.due;
        if due > now {
            return None;
        }
        let scheduled = self.scheduled.take()?;
        self.settled = true;
        info!(next_episode_id = %scheduled.next_episode_id, "autoplay firing");
        Some(scheduled.next_episode_id)
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.scheduled.is_some()
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.scheduled.as_ref().map(|scheduled| scheduled.due)
    }

    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|due| due.saturating_duration_since(now))
    }
}
