use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::app::tracking::{
    PersistenceError, ProgressRecord, ProgressStore, ProgressWrite, Reconciled, WriteAck,
    reconcile_write,
};

const RECORD_COLUMNS: &str = "profile_id, episode_id, show_id, position_seconds, completed, writer_session, writer_sequence, updated_at";

pub struct Database {
    conn: Connection,
    rewind_tolerance: f64,
}

impl Database {
    pub fn open(path: &Path, rewind_tolerance: f64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self {
            conn,
            rewind_tolerance,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(rewind_tolerance: f64) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self {
            conn,
            rewind_tolerance,
        })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS watch_progress (
                profile_id TEXT NOT NULL,
                episode_id TEXT NOT NULL,
                show_id TEXT NOT NULL,
                position_seconds REAL NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                writer_session TEXT NOT NULL,
                writer_sequence INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (profile_id, episode_id)
            );
            CREATE INDEX IF NOT EXISTS idx_watch_progress_updated
                ON watch_progress(profile_id, updated_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn list_progress(&self, profile_id: &str) -> Result<Vec<ProgressRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM watch_progress WHERE profile_id = ?1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map(params![profile_id], record_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_progress(
        conn: &Connection,
        profile_id: &str,
        episode_id: &str,
    ) -> rusqlite::Result<Option<ProgressRecord>> {
        conn.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM watch_progress WHERE profile_id = ?1 AND episode_id = ?2"
            ),
            params![profile_id, episode_id],
            record_from_row,
        )
        .optional()
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressRecord> {
    let updated_raw: String = row.get(7)?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
        })?;
    let sequence: i64 = row.get(6)?;
    Ok(ProgressRecord {
        profile_id: row.get(0)?,
        episode_id: row.get(1)?,
        show_id: row.get(2)?,
        position_seconds: row.get(3)?,
        completed: row.get(4)?,
        writer_session: row.get(5)?,
        writer_sequence: u64::try_from(sequence).unwrap_or_default(),
        updated_at,
    })
}

impl ProgressStore for Database {
    fn fetch_progress(
        &self,
        profile_id: &str,
        episode_id: &str,
    ) -> Result<Option<ProgressRecord>, PersistenceError> {
        Ok(Self::get_progress(&self.conn, profile_id, episode_id)?)
    }

    fn write_progress(&self, write: &ProgressWrite) -> Result<WriteAck, PersistenceError> {
        let tx = self.conn.unchecked_transaction()?;
        let existing = Self::get_progress(&tx, &write.profile_id, &write.episode_id)?;

        let ack = match reconcile_write(existing.as_ref(), write, self.rewind_tolerance) {
            Reconciled::Apply {
                position_seconds,
                completed,
            } => {
                let now = Utc::now().to_rfc3339();
                tx.execute(
                    r#"
                    INSERT INTO watch_progress (
                        profile_id, episode_id, show_id, position_seconds, completed,
                        writer_session, writer_sequence, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(profile_id, episode_id) DO UPDATE SET
                        show_id = excluded.show_id,
                        position_seconds = excluded.position_seconds,
                        completed = excluded.completed,
                        writer_session = excluded.writer_session,
                        writer_sequence = excluded.writer_sequence,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        write.profile_id,
                        write.episode_id,
                        write.show_id,
                        position_seconds,
                        completed,
                        write.token.session_id,
                        i64::try_from(write.token.sequence).unwrap_or(i64::MAX),
                        now
                    ],
                )?;
                WriteAck {
                    applied: true,
                    position_seconds,
                    completed,
                }
            }
            Reconciled::Stale(reason) => {
                debug!(
                    episode_id = %write.episode_id,
                    sequence = write.token.sequence,
                    reason,
                    "rejected stale progress write"
                );
                let (position_seconds, completed) = existing
                    .as_ref()
                    .map_or((write.position_seconds, write.completed), |record| {
                        (record.position_seconds, record.completed)
                    });
                WriteAck {
                    applied: false,
                    position_seconds,
                    completed,
                }
            }
        };
        tx.commit()?;
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tracking::{CheckpointReason, WriteToken};
    use chrono::Duration as ChronoDuration;

    fn write(session: &str, sequence: u64, position: f64, completed: bool) -> ProgressWrite {
        ProgressWrite {
            profile_id: "profile-1".to_string(),
            episode_id: "ep-1".to_string(),
            show_id: "show-1".to_string(),
            position_seconds: position,
            completed,
            reason: CheckpointReason::Periodic,
            token: WriteToken {
                session_id: session.to_string(),
                session_started_at: Utc::now() - ChronoDuration::hours(1),
                sequence,
            },
            attempt: 1,
        }
    }

    fn open_db() -> Database {
        let db = Database::open_in_memory(5.0).expect("open db");
        db.migrate().expect("migrate");
        db
    }

    #[test]
    fn first_write_creates_record() {
        let db = open_db();
        let ack = db
            .write_progress(&write("s1", 1, 620.0, false))
            .expect("write");
        assert!(ack.applied);

        let record = db
            .fetch_progress("profile-1", "ep-1")
            .expect("fetch")
            .expect("record exists");
        assert_eq!(record.position_seconds, 620.0);
        assert!(!record.completed);
        assert_eq!(record.writer_session, "s1");
        assert_eq!(record.writer_sequence, 1);
    }

    #[test]
    fn missing_record_is_none() {
        let db = open_db();
        assert!(db.fetch_progress("profile-1", "ep-9").expect("fetch").is_none());
    }

    #[test]
    fn same_session_rewind_keeps_completion() {
        let db = open_db();
        db.write_progress(&write("s1", 1, 1300.0, true))
            .expect("write");
        let ack = db
            .write_progress(&write("s1", 2, 800.0, false))
            .expect("write");
        assert!(ack.applied);
        assert!(ack.completed);

        let record = db
            .fetch_progress("profile-1", "ep-1")
            .expect("fetch")
            .expect("record exists");
        assert_eq!(record.position_seconds, 800.0);
        assert!(record.completed);
    }

    #[test]
    fn older_sequence_from_same_session_is_rejected() {
        let db = open_db();
        db.write_progress(&write("s1", 5, 300.0, false))
            .expect("write");
        let ack = db
            .write_progress(&write("s1", 4, 250.0, false))
            .expect("write");
        assert!(!ack.applied);
        assert_eq!(ack.position_seconds, 300.0);
    }

    #[test]
    fn list_progress_returns_profile_records() {
        let db = open_db();
        db.write_progress(&write("s1", 1, 100.0, false))
            .expect("write");
        let mut other = write("s1", 2, 50.0, false);
        other.episode_id = "ep-2".to_string();
        db.write_progress(&other).expect("write");

        let records = db.list_progress("profile-1").expect("list");
        assert_eq!(records.len(), 2);
        assert!(db.list_progress("profile-2").expect("list").is_empty());
    }
}
