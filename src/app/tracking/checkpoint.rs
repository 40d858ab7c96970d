use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::PersistenceError;
use super::store::{ProgressWrite, WriteAck, WriteToken};
use crate::config::PlaybackConfig;

const MAX_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum CheckpointReason {
    Periodic,
    Pause,
    SeekSettled,
    Completion,
    Unload,
}

impl CheckpointReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Periodic => "periodic",
            Self::Pause => "pause",
            Self::SeekSettled => "seek-settled",
            Self::Completion => "completion",
            Self::Unload => "unload",
        }
    }

    fn is_debounced(self) -> bool {
        matches!(self, Self::Pause | Self::SeekSettled)
    }

    fn is_retried(self) -> bool {
        !matches!(self, Self::Unload)
    }
}

impl fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (profile, episode) pair a checkpointer writes for.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CheckpointTarget {
    pub(crate) profile_id: String,
    pub(crate) episode_id: String,
    pub(crate) show_id: String,
    pub(crate) duration_seconds: f64,
}

/// Last write the store acknowledged, by sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Confirmed {
    pub(crate) sequence: u64,
    pub(crate) position_seconds: f64,
    pub(crate) completed: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingCheckpoint {
    reason: CheckpointReason,
    position: f64,
    due: Instant,
}

#[derive(Debug, Clone)]
struct ScheduledRetry {
    write: ProgressWrite,
    due: Instant,
}

#[derive(Debug)]
pub(crate) struct Checkpointer {
    target: CheckpointTarget,
    session_id: String,
    session_started_at: DateTime<Utc>,
    interval: Duration,
    debounce: Duration,
    backoff: Duration,
    completion_ratio: f64,
    sequence: u64,
    completed_sent: bool,
    last_confirmed: Option<Confirmed>,
    periodic_due: Option<Instant>,
    pending: Option<PendingCheckpoint>,
    in_flight: HashMap<u64, ProgressWrite>,
    retries: Vec<ScheduledRetry>,
    outbox: Vec<ProgressWrite>,
    closed: bool,
}

impl Checkpointer {
    pub(crate) fn new(
        target: CheckpointTarget,
        session_id: &str,
        session_started_at: DateTime<Utc>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            target,
            session_id: session_id.to_string(),
            session_started_at,
            interval: config.checkpoint_interval,
            debounce: config.seek_debounce,
            backoff: config.retry_backoff,
            completion_ratio: config.completion_ratio,
            sequence: 0,
            completed_sent: false,
            last_confirmed: None,
            periodic_due: None,
            pending: None,
            in_flight: HashMap::new(),
            retries: Vec::new(),
            outbox: Vec::new(),
            closed: false,
        }
    }

    /// Starts from a record that is already completed, so no write of this
    /// session can clear it.
    pub(crate) fn with_completed(mut self, completed: bool) -> Self {
        self.completed_sent = completed;
        self
    }

    pub(crate) fn start_periodic(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        self.periodic_due = Some(now + self.interval);
    }

    pub(crate) fn stop_periodic(&mut self) {
        self.periodic_due = None;
    }

    pub(crate) fn request(&mut self, reason: CheckpointReason, position: f64, now: Instant) {
        if self.closed {
            return;
        }
        if reason.is_debounced() {
            // Supersede, never accumulate: only the latest request in the window survives.
            self.pending = Some(PendingCheckpoint {
                reason,
                position,
                due: now + self.debounce,
            });
            return;
        }
        if !matches!(reason, CheckpointReason::Periodic) {
            self.pending = None;
        }
        self.send(reason, position, now);
    }

    pub(crate) fn poll(&mut self, now: Instant, position: f64) {
        if self.closed {
            return;
        }

        if let Some(pending) = self.pending
            && pending.due <= now
        {
            self.pending = None;
            self.send(pending.reason, pending.position, now);
        }

        if let Some(due) = self.periodic_due
            && due <= now
        {
            self.send(CheckpointReason::Periodic, position, now);
        }

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retries)
            .into_iter()
            .partition(|retry| retry.due <= now);
        self.retries = waiting;
        for retry in due {
            let mut write = retry.write;
            if self.is_superseded(write.token.sequence) {
                debug!(
                    sequence = write.token.sequence,
                    latest = self.sequence,
                    "dropping retry superseded by a newer checkpoint"
                );
                continue;
            }
            write.attempt += 1;
            debug!(
                sequence = write.token.sequence,
                attempt = write.attempt,
                reason = %write.reason,
                "retrying checkpoint"
            );
            self.in_flight.insert(write.token.sequence, write.clone());
            self.outbox.push(write);
        }
    }

    fn send(&mut self, reason: CheckpointReason, position: f64, now: Instant) {
        self.sequence += 1;
        let position = position.clamp(0.0, self.target.duration_seconds.max(0.0));
        let reached_threshold = self.target.duration_seconds > 0.0
            && position >= self.completion_ratio * self.target.duration_seconds;
        let completed = self.completed_sent
            || reached_threshold
            || matches!(reason, CheckpointReason::Completion);
        self.completed_sent = completed;

        let write = ProgressWrite {
            profile_id: self.target.profile_id.clone(),
            episode_id: self.target.episode_id.clone(),
            show_id: self.target.show_id.clone(),
            position_seconds: position,
            completed,
            reason,
            token: WriteToken {
                session_id: self.session_id.clone(),
                session_started_at: self.session_started_at,
                sequence: self.sequence,
            },
            attempt: 1,
        };
        debug!(
            episode_id = %write.episode_id,
            sequence = self.sequence,
            reason = %reason,
            position,
            completed,
            "checkpoint issued"
        );

        if self.periodic_due.is_some() {
            self.periodic_due = Some(now + self.interval);
        }
        self.in_flight.insert(self.sequence, write.clone());
        self.outbox.push(write);
    }

    pub(crate) fn on_write_result(
        &mut self,
        sequence: u64,
        result: Result<WriteAck, PersistenceError>,
        now: Instant,
    ) {
        let Some(write) = self.in_flight.remove(&sequence) else {
            debug!(sequence, "ignoring response for unknown checkpoint");
            return;
        };

        match result {
            Ok(ack) if ack.applied => {
                let newer = self
                    .last_confirmed
                    .is_none_or(|confirmed| sequence > confirmed.sequence);
                if newer {
                    self.last_confirmed = Some(Confirmed {
                        sequence,
                        position_seconds: write.position_seconds,
                        completed: ack.completed,
                    });
                } else {
                    debug!(sequence, "discarding out-of-order checkpoint response");
                }
            }
            Ok(_) => {
                debug!(sequence, reason = %write.reason, "store kept a newer record");
            }
            Err(err) => self.on_write_failed(write, err, now),
        }
    }

    fn on_write_failed(&mut self, write: ProgressWrite, err: PersistenceError, now: Instant) {
        let sequence = write.token.sequence;
        if self.closed
            || self.is_superseded(sequence)
            || !write.reason.is_retried()
            || write.attempt >= MAX_ATTEMPTS
        {
            warn!(
                sequence,
                reason = %write.reason,
                attempt = write.attempt,
                error = %err,
                "dropping checkpoint"
            );
            return;
        }

        warn!(
            sequence,
            reason = %write.reason,
            error = %err,
            "checkpoint failed; retrying once"
        );
        self.retries.push(ScheduledRetry {
            write,
            due: now + self.backoff,
        });
    }

    // A newer write replaces an older one in full.
    fn is_superseded(&self, sequence: u64) -> bool {
        sequence < self.sequence
            || self
                .last_confirmed
                .is_some_and(|confirmed| confirmed.sequence > sequence)
    }

    /// Cancels every timer; with `unload`, issues one final best-effort write first.
    pub(crate) fn close(&mut self, position: f64, unload: bool, now: Instant) {
        if self.closed {
            return;
        }
        self.pending = None;
        self.periodic_due = None;
        self.retries.clear();
        if unload {
            self.send(CheckpointReason::Unload, position, now);
        }
        self.closed = true;
    }

    pub(crate) fn drain_outbox(&mut self) -> Vec<ProgressWrite> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let pending = self.pending.map(|pending| pending.due);
        let retry = self.retries.iter().map(|retry| retry.due).min();
        [pending, self.periodic_due, retry].into_iter().flatten().min()
    }

    pub(crate) fn last_confirmed(&self) -> Option<Confirmed> {
        self.last_confirmed
    }

    #[cfg(test)]
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    #[cfg(test)]
    pub(crate) fn completed_sent(&self) -> bool {
        self.completed_sent
    }
}
