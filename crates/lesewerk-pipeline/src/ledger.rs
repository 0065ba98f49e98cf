// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job-status ledger backed by SQLite.
//
// Records what happened to each job (state, page count, confidence, error)
// so callers can look a job up after the fact. Only metadata is stored:
// document bytes and recognised text never touch the database. Documents
// are identified by a SHA-256 fingerprint of their payloads.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{Document, DocumentStatus, JobId};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        file_count INTEGER NOT NULL,
        page_count INTEGER,
        fingerprint TEXT NOT NULL,
        overall_confidence REAL,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS jobs_created_at ON jobs (created_at);
"#;

const SELECT_COLUMNS: &str = "SELECT id, state, file_count, page_count, fingerprint, \
     overall_confidence, error_message, created_at, updated_at FROM jobs";

/// Where a job is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Received,
    Processing,
    Ok,
    Partial,
    Failed,
    /// Refused before any page was recognised (format, size, empty).
    Rejected,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        Self::Received,
        Self::Processing,
        Self::Ok,
        Self::Partial,
        Self::Failed,
        Self::Rejected,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "processing" => Some(Self::Processing),
            "ok" => Some(Self::Ok),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Received | Self::Processing)
    }
}

impl From<DocumentStatus> for JobState {
    fn from(status: DocumentStatus) -> Self {
        match status {
            DocumentStatus::Ok => Self::Ok,
            DocumentStatus::Partial => Self::Partial,
            DocumentStatus::Failed => Self::Failed,
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub file_count: usize,
    pub page_count: Option<usize>,
    /// SHA-256 over all source payloads, hex encoded.
    pub fingerprint: String,
    pub overall_confidence: Option<f32>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite job ledger.
///
/// Synchronous like all `rusqlite` code; async callers go through
/// `spawn_blocking`.
pub struct JobLedger {
    conn: Connection,
}

impl JobLedger {
    /// Open (or create) the ledger database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| LesewerkError::Ledger(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LesewerkError::Ledger(format!("WAL pragma: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| LesewerkError::Ledger(format!("create table: {e}")))?;

        info!("Job ledger opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LesewerkError::Ledger(format!("open in-memory: {e}")))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| LesewerkError::Ledger(format!("create table: {e}")))?;

        debug!("In-memory job ledger opened");
        Ok(Self { conn })
    }

    /// Record a newly accepted document.
    #[instrument(skip(self, fingerprint), fields(job_id = %id))]
    pub fn record_received(&self, id: JobId, file_count: usize, fingerprint: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO jobs (id, state, file_count, fingerprint, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.to_string(),
                    JobState::Received.as_str(),
                    file_count as i64,
                    fingerprint,
                    now
                ],
            )
            .map_err(|e| LesewerkError::Ledger(format!("insert job: {e}")))?;
        debug!("Job recorded");
        Ok(())
    }

    /// Pages are known and about to be recognised.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn mark_processing(&self, id: JobId, page_count: usize) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, page_count = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    JobState::Processing.as_str(),
                    page_count as i64,
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .map_err(|e| LesewerkError::Ledger(format!("mark processing: {e}")))?;
        if rows == 0 {
            return Err(LesewerkError::Ledger(format!("job {id} not found")));
        }
        Ok(())
    }

    /// Record the final state of a job.
    #[instrument(skip(self, error_message), fields(job_id = %id, state = state.as_str()))]
    pub fn mark_finished(
        &self,
        id: JobId,
        state: JobState,
        overall_confidence: Option<f32>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, overall_confidence = ?2, error_message = ?3,
                 updated_at = ?4 WHERE id = ?5",
                params![
                    state.as_str(),
                    overall_confidence.map(f64::from),
                    error_message,
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .map_err(|e| LesewerkError::Ledger(format!("mark finished: {e}")))?;
        if rows == 0 {
            return Err(LesewerkError::Ledger(format!("job {id} not found")));
        }
        debug!("Job finished");
        Ok(())
    }

    pub fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_record,
            )
            .optional()
            .map_err(|e| LesewerkError::Ledger(format!("get job: {e}")))
    }

    /// Delete finished jobs created before `cutoff`. Jobs still received or
    /// processing are kept whatever their age. Returns the rows removed.
    #[instrument(skip(self))]
    pub fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let terminal: Vec<&str> = JobState::ALL
            .iter()
            .filter(|state| state.is_terminal())
            .map(JobState::as_str)
            .collect();
        let placeholders = (0..terminal.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("DELETE FROM jobs WHERE created_at < ?1 AND state IN ({placeholders})");

        let cutoff = cutoff.to_rfc3339();
        let values = std::iter::once(cutoff.as_str()).chain(terminal);
        let removed = self
            .conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| LesewerkError::Ledger(format!("prune jobs: {e}")))?;
        if removed > 0 {
            info!(removed, "Expired jobs pruned from ledger");
        }
        Ok(removed)
    }
}

/// SHA-256 over every source payload in order, hex encoded.
pub fn fingerprint(document: &Document) -> String {
    let mut hasher = Sha256::new();
    for file in &document.files {
        hasher.update((file.bytes.len() as u64).to_le_bytes());
        hasher.update(&file.bytes);
    }
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Column order follows `SELECT_COLUMNS`.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let id_str: String = row.get(0)?;
    let state_str: String = row.get(1)?;
    let file_count: i64 = row.get(2)?;
    let page_count: Option<i64> = row.get(3)?;
    let fingerprint: String = row.get(4)?;
    let overall_confidence: Option<f64> = row.get(5)?;
    let error_message: Option<String> = row.get(6)?;
    let created_at_str: String = row.get(7)?;
    let updated_at_str: String = row.get(8)?;

    let id = JobId::parse(&id_str)
        .ok_or_else(|| conversion_error(0, format!("bad job id {id_str:?}")))?;
    let state = JobState::parse(&state_str)
        .ok_or_else(|| conversion_error(1, format!("bad job state {state_str:?}")))?;

    Ok(JobRecord {
        id,
        state,
        file_count: file_count.max(0) as usize,
        page_count: page_count.map(|n| n.max(0) as usize),
        fingerprint,
        overall_confidence: overall_confidence.map(|c| c as f32),
        error_message,
        created_at: parse_timestamp(7, &created_at_str)?,
        updated_at: parse_timestamp(8, &updated_at_str)?,
    })
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(LesewerkError::Ledger(message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesewerk_core::SourceFile;

    #[test]
    fn received_then_processing_then_finished() {
        let ledger = JobLedger::open_in_memory().expect("open in-memory db");
        let id = JobId::new();
        ledger.record_received(id, 2, "abc123").expect("insert");

        let record = ledger.get(id).expect("get").expect("found");
        assert_eq!(record.state, JobState::Received);
        assert_eq!(record.file_count, 2);
        assert_eq!(record.page_count, None);
        assert_eq!(record.fingerprint, "abc123");

        ledger.mark_processing(id, 5).expect("processing");
        ledger
            .mark_finished(id, JobState::Partial, Some(0.5), None)
            .expect("finish");

        let record = ledger.get(id).expect("get").expect("found");
        assert_eq!(record.state, JobState::Partial);
        assert_eq!(record.page_count, Some(5));
        assert_eq!(record.overall_confidence, Some(0.5));
        assert!(record.error_message.is_none());
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn rejected_job_keeps_its_error() {
        let ledger = JobLedger::open_in_memory().expect("open in-memory db");
        let id = JobId::new();
        ledger.record_received(id, 1, "ff").expect("insert");
        ledger
            .mark_finished(id, JobState::Rejected, None, Some("unsupported format"))
            .expect("finish");

        let record = ledger.get(id).expect("get").expect("found");
        assert_eq!(record.state, JobState::Rejected);
        assert!(record.state.is_terminal());
        assert_eq!(record.error_message.as_deref(), Some("unsupported format"));
    }

    #[test]
    fn unknown_job_is_none_and_update_fails() {
        let ledger = JobLedger::open_in_memory().expect("open in-memory db");
        assert!(ledger.get(JobId::new()).expect("get").is_none());
        assert!(ledger.mark_processing(JobId::new(), 1).is_err());
    }

    #[test]
    fn pruning_removes_only_expired_finished_jobs() {
        let ledger = JobLedger::open_in_memory().expect("open in-memory db");
        let finished = JobId::new();
        let running = JobId::new();
        ledger.record_received(finished, 1, "aa").expect("insert");
        ledger
            .mark_finished(finished, JobState::Ok, Some(0.9), None)
            .expect("finish");
        ledger.record_received(running, 1, "bb").expect("insert");
        ledger.mark_processing(running, 3).expect("processing");

        let before = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(ledger.prune_finished_before(before).expect("prune"), 0);

        let after = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(ledger.prune_finished_before(after).expect("prune"), 1);
        assert!(ledger.get(finished).expect("get").is_none());
        assert_eq!(
            ledger.get(running).expect("get").expect("kept").state,
            JobState::Processing
        );
    }

    #[test]
    fn ledger_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.db");
        let id = JobId::new();
        {
            let ledger = JobLedger::open(&path).expect("open");
            ledger.record_received(id, 1, "beef").expect("insert");
        }
        let ledger = JobLedger::open(&path).expect("reopen");
        assert_eq!(ledger.get(id).expect("get").expect("found").fingerprint, "beef");
    }

    #[test]
    fn fingerprint_depends_on_file_boundaries() {
        let doc = |parts: [&str; 2]| {
            Document::new(parts.iter().map(|p| SourceFile::new(p.as_bytes().to_vec())).collect())
        };
        let a = doc(["ab", "c"]);
        let b = doc(["a", "bc"]);
        let a2 = doc(["ab", "c"]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a), fingerprint(&a2));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn job_state_round_trips() {
        for state in JobState::ALL {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
            assert_eq!(
                state.is_terminal(),
                !matches!(state, JobState::Received | JobState::Processing)
            );
        }
        assert_eq!(JobState::from(DocumentStatus::Partial), JobState::Partial);
    }
}
