// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite cache of jobs submitted through the relay.
//
// CUPS is the authority on job state; this table only remembers which jobs
// came through us, for which printer, and the last state we observed, so
// status queries still answer after CUPS has forgotten a finished job.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use relayprint_core::error::{RelayError, Result};
use relayprint_core::{JobState, PrintJobRecord};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS print_jobs (
        job_id INTEGER PRIMARY KEY,
        printer_name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        completed_at TEXT,
        error_message TEXT
    )
"#;

const SELECT_COLUMNS: &str =
    "SELECT job_id, printer_name, status, created_at, completed_at, error_message FROM print_jobs";

/// Job records keyed by spooler job id.
///
/// Synchronous like all of `rusqlite`; callers hold it behind a mutex and
/// never across an await point.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| RelayError::Database(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| RelayError::Database(format!("WAL pragma: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| RelayError::Database(format!("create table: {e}")))?;

        info!("job cache database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RelayError::Database(format!("open in-memory: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| RelayError::Database(format!("create table: {e}")))?;

        debug!("in-memory job cache opened");
        Ok(Self { conn })
    }

    /// Insert a record, replacing any earlier one with the same id.
    ///
    /// CUPS reuses ids after its own history is purged.
    #[instrument(skip(self, record), fields(job_id = record.job_id))]
    pub fn insert(&self, record: &PrintJobRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO print_jobs
                 (job_id, printer_name, status, created_at, completed_at, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.job_id,
                    record.printer_name,
                    record.status.as_str(),
                    timestamp(record.created_at),
                    record.completed_at.map(timestamp),
                    record.error_message,
                ],
            )
            .map_err(|e| RelayError::Database(format!("insert job: {e}")))?;
        Ok(())
    }

    /// Persist the status fields of an existing record.
    #[instrument(skip(self, record), fields(job_id = record.job_id, status = record.status.as_str()))]
    pub fn update(&self, record: &PrintJobRecord) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs SET status = ?1, completed_at = ?2, error_message = ?3
                 WHERE job_id = ?4",
                params![
                    record.status.as_str(),
                    record.completed_at.map(timestamp),
                    record.error_message,
                    record.job_id,
                ],
            )
            .map_err(|e| RelayError::Database(format!("update job: {e}")))?;

        if rows == 0 {
            return Err(RelayError::JobNotFound(record.job_id));
        }
        Ok(())
    }

    pub fn get(&self, job_id: i32) -> Result<Option<PrintJobRecord>> {
        self.conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE job_id = ?1"),
                params![job_id],
                row_to_record,
            )
            .optional()
            .map_err(|e| RelayError::Database(format!("get job {job_id}: {e}")))
    }

    /// All records, newest first.
    pub fn all(&self) -> Result<Vec<PrintJobRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC"))
            .map_err(|e| RelayError::Database(format!("prepare all: {e}")))?;

        stmt.query_map([], row_to_record)
            .map_err(|e| RelayError::Database(format!("query all: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RelayError::Database(format!("collect rows: {e}")))
    }

    /// Delete records completed before `cutoff`. Returns how many went.
    #[instrument(skip(self))]
    pub fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        // Fixed-width UTC timestamps compare correctly as text.
        let removed = self
            .conn
            .execute(
                "DELETE FROM print_jobs WHERE completed_at IS NOT NULL AND completed_at < ?1",
                params![timestamp(cutoff)],
            )
            .map_err(|e| RelayError::Database(format!("delete old jobs: {e}")))?;
        Ok(removed)
    }
}

/// Column order must match [`SELECT_COLUMNS`].
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJobRecord> {
    let status: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let completed_at: Option<String> = row.get(4)?;

    let status: JobState = status.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(PrintJobRecord {
        job_id: row.get(0)?,
        printer_name: row.get(1)?,
        status,
        created_at: parse_timestamp(&created_at, 3)?,
        completed_at: completed_at.map(|t| parse_timestamp(&t, 4)).transpose()?,
        error_message: row.get(5)?,
    })
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn insert_and_get() {
        let store = JobStore::open_in_memory().expect("open");
        store.insert(&PrintJobRecord::new(17, "Office_Laser")).expect("insert");

        let record = store.get(17).expect("get").expect("found");
        assert_eq!(record.printer_name, "Office_Laser");
        assert_eq!(record.status, JobState::Pending);
        assert!(record.completed_at.is_none());
        assert!(store.get(18).expect("get").is_none());
    }

    #[test]
    fn update_persists_status() {
        let store = JobStore::open_in_memory().expect("open");
        let mut record = PrintJobRecord::new(3, "Lab");
        store.insert(&record).expect("insert");

        record.status = JobState::Aborted;
        record.completed_at = Some(Utc::now());
        record.error_message = Some("paper jam".into());
        store.update(&record).expect("update");

        let stored = store.get(3).expect("get").expect("found");
        assert_eq!(stored.status, JobState::Aborted);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.error_message.as_deref(), Some("paper jam"));
    }

    #[test]
    fn update_unknown_job_is_not_found() {
        let store = JobStore::open_in_memory().expect("open");
        let err = store.update(&PrintJobRecord::new(99, "Lab")).expect_err("missing");
        assert!(matches!(err, RelayError::JobNotFound(99)));
    }

    #[test]
    fn all_is_newest_first() {
        let store = JobStore::open_in_memory().expect("open");
        let mut older = PrintJobRecord::new(1, "Lab");
        older.created_at = Utc::now() - Duration::minutes(5);
        store.insert(&older).expect("insert");
        store.insert(&PrintJobRecord::new(2, "Lab")).expect("insert");

        let ids: Vec<_> = store.all().expect("all").iter().map(|r| r.job_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn delete_only_old_completed_jobs() {
        let store = JobStore::open_in_memory().expect("open");
        let now = Utc::now();

        let mut old = PrintJobRecord::new(1, "Lab");
        old.status = JobState::Completed;
        old.completed_at = Some(now - Duration::hours(30));
        let mut recent = PrintJobRecord::new(2, "Lab");
        recent.status = JobState::Completed;
        recent.completed_at = Some(now - Duration::hours(1));
        let pending = PrintJobRecord::new(3, "Lab");
        for record in [&old, &recent, &pending] {
            store.insert(record).expect("insert");
        }

        let removed = store
            .delete_completed_before(now - Duration::hours(24))
            .expect("delete");
        assert_eq!(removed, 1);
        assert!(store.get(1).expect("get").is_none());
        assert!(store.get(2).expect("get").is_some());
        assert!(store.get(3).expect("get").is_some());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.db");
        JobStore::open(&path)
            .expect("open")
            .insert(&PrintJobRecord::new(5, "Lab"))
            .expect("insert");

        let reopened = JobStore::open(&path).expect("reopen");
        assert!(reopened.get(5).expect("get").is_some());
    }
}
