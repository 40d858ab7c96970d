use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::PersistenceError;
use super::checkpoint::CheckpointReason;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgressRecord {
    pub(crate) profile_id: String,
    pub(crate) episode_id: String,
    pub(crate) show_id: String,
    pub(crate) position_seconds: f64,
    pub(crate) completed: bool,
    pub(crate) writer_session: String,
    pub(crate) writer_sequence: u64,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Identifies which session produced a write and in what order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteToken {
    pub(crate) session_id: String,
    pub(crate) session_started_at: DateTime<Utc>,
    pub(crate) sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgressWrite {
    pub(crate) profile_id: String,
    pub(crate) episode_id: String,
    pub(crate) show_id: String,
    pub(crate) position_seconds: f64,
    pub(crate) completed: bool,
    pub(crate) reason: CheckpointReason,
    pub(crate) token: WriteToken,
    pub(crate) attempt: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WriteAck {
    pub(crate) applied: bool,
    pub(crate) position_seconds: f64,
    pub(crate) completed: bool,
}

pub(crate) trait ProgressStore {
    fn fetch_progress(
        &self,
        profile_id: &str,
        episode_id: &str,
    ) -> Result<Option<ProgressRecord>, PersistenceError>;

    fn write_progress(&self, write: &ProgressWrite) -> Result<WriteAck, PersistenceError>;
}

impl<T: ProgressStore + ?Sized> ProgressStore for &T {
    fn fetch_progress(
        &self,
        profile_id: &str,
        episode_id: &str,
    ) -> Result<Option<ProgressRecord>, PersistenceError> {
        (**self).fetch_progress(profile_id, episode_id)
    }

    fn write_progress(&self, write: &ProgressWrite) -> Result<WriteAck, PersistenceError> {
        (**self).write_progress(write)
    }
}

impl<T: ProgressStore + ?Sized> ProgressStore for Box<T> {
    fn fetch_progress(
        &self,
        profile_id: &str,
        episode_id: &str,
    ) -> Result<Option<ProgressRecord>, PersistenceError> {
        (**self).fetch_progress(profile_id, episode_id)
    }

    fn write_progress(&self, write: &ProgressWrite) -> Result<WriteAck, PersistenceError> {
        (**self).write_progress(write)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Reconciled {
    Apply { position_seconds: f64, completed: bool },
    Stale(&'static str),
}

/// Decides whether `write` may replace `existing`.
///
/// Completion is sticky. Writes from the session that produced the stored
/// record are ordered by sequence; writes from another session may only
/// regress the position by more than `rewind_tolerance` when that session
/// started after the stored record was written.
pub(crate) fn reconcile_write(
    existing: Option<&ProgressRecord>,
    write: &ProgressWrite,
    rewind_tolerance: f64,
) -> Reconciled {
    let Some(existing) = existing else {
        return Reconciled::Apply {
            position_seconds: write.position_seconds,
            completed: write.completed,
        };
    };

    if existing.writer_session == write.token.session_id {
        if write.token.sequence <= existing.writer_sequence {
            return Reconciled::Stale("sequence already superseded");
        }
    } else if write.position_seconds < existing.position_seconds - rewind_tolerance
        && write.token.session_started_at < existing.updated_at
    {
        return Reconciled::Stale("regression from a session older than the stored record");
    }

    Reconciled::Apply {
        position_seconds: write.position_seconds,
        completed: existing.completed || write.completed,
    }
}

/// Process-local store used for ephemeral runs.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    records: RefCell<HashMap<(String, String), ProgressRecord>>,
    rewind_tolerance: f64,
}

impl MemoryStore {
    pub(crate) fn new(rewind_tolerance: f64) -> Self {
        Self {
            records: RefCell::new(HashMap::new()),
            rewind_tolerance,
        }
    }

    pub(crate) fn records(&self) -> Vec<ProgressRecord> {
        let mut out: Vec<ProgressRecord> = self.records.borrow().values().cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, record: ProgressRecord) {
        self.records.borrow_mut().insert(
            (record.profile_id.clone(), record.episode_id.clone()),
            record,
        );
    }
}

impl ProgressStore for MemoryStore {
    fn fetch_progress(
        &self,
        profile_id: &str,
        episode_id: &str,
    ) -> Result<Option<ProgressRecord>, PersistenceError> {
        Ok(self
            .records
            .borrow()
            .get(&(profile_id.to_string(), episode_id.to_string()))
            .cloned())
    }

    fn write_progress(&self, write: &ProgressWrite) -> Result<WriteAck, PersistenceError> {
        let key = (write.profile_id.clone(), write.episode_id.clone());
        let mut records = self.records.borrow_mut();
        let existing = records.get(&key);
        match reconcile_write(existing, write, self.rewind_tolerance) {
            Reconciled::Apply {
                position_seconds,
                completed,
            } => {
                records.insert(
                    key,
                    ProgressRecord {
                        profile_id: write.profile_id.clone(),
                        episode_id: write.episode_id.clone(),
                        show_id: write.show_id.clone(),
                        position_seconds,
                        completed,
                        writer_session: write.token.session_id.clone(),
                        writer_sequence: write.token.sequence,
                        updated_at: Utc::now(),
                    },
                );
                Ok(WriteAck {
                    applied: true,
                    position_seconds,
                    completed,
                })
            }
            Reconciled::Stale(reason) => {
                debug!(
                    episode_id = %write.episode_id,
                    sequence = write.token.sequence,
                    reason,
                    "rejected stale progress write"
                );
                let current = existing.map_or((write.position_seconds, write.completed), |r| {
                    (r.position_seconds, r.completed)
                });
                Ok(WriteAck {
                    applied: false,
                    position_seconds: current.0,
                    completed: current.1,
                })
            }
        }
    }
}
