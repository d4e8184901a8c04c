//! Execution log store.
//!
//! One row per (job name, target date) is the log of record for that date.
//! The daily run claims the row before sending and finalizes it afterwards;
//! manual resends merge their per-ward result into the same row inside a
//! write-locking transaction.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::storage::Pool;

/// Lifecycle of a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Running,
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Running => "running",
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }

}

/// A stored enum column held a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {column} value {value:?}")]
pub struct UnknownValue {
    column: &'static str,
    value: String,
}

impl FromStr for LogStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(LogStatus::Running),
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            other => Err(UnknownValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// What wrote the row: the daily run, or a manual resend that found no row
/// for its date. A run claiming a resend-created row takes it over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOrigin {
    Run,
    Resend,
}

impl LogOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOrigin::Run => "run",
            LogOrigin::Resend => "resend",
        }
    }
}

impl FromStr for LogOrigin {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(LogOrigin::Run),
            "resend" => Ok(LogOrigin::Resend),
            other => Err(UnknownValue {
                column: "origin",
                value: other.to_string(),
            }),
        }
    }
}

/// Delivery outcome for one ward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Sent,
    SendFailed,
    Skipped,
    Error,
}

/// One ward's outcome inside a log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomResult {
    pub room: String,
    pub phone: Option<String>,
    pub status: RoomStatus,
    pub surgery_count: usize,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub resent_at: Option<DateTime<Utc>>,
}

/// The structured `details_json` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogDetails {
    #[serde(default)]
    pub rooms: Vec<RoomResult>,
}

impl LogDetails {
    pub fn room(&self, room: &str) -> Option<&RoomResult> {
        self.rooms.iter().find(|r| r.room == room)
    }

    /// Replace the entry for `result.room`, or append it.
    pub fn upsert(&mut self, result: RoomResult) {
        match self.rooms.iter_mut().find(|r| r.room == result.room) {
            Some(slot) => *slot = result,
            None => self.rooms.push(result),
        }
    }

    fn parse(id: i64, raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(log_id = id, error = %e, "unreadable execution log details, treating as empty");
            Self::default()
        })
    }
}

/// A full execution log row.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionLog {
    pub id: i64,
    pub run_id: String,
    pub job_name: String,
    pub target_date: NaiveDate,
    pub status: LogStatus,
    pub summary: String,
    pub details: LogDetails,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub logged_at: DateTime<Utc>,
    pub version: i64,
    pub origin: LogOrigin,
}

impl ExecutionLog {
    /// A daily run finished this row successfully. Rows created by a resend
    /// alone never count, whatever their status.
    pub fn is_completed_run(&self) -> bool {
        self.origin == LogOrigin::Run && self.status == LogStatus::Success && self.finished_at.is_some()
    }
}

const SELECT_COLUMNS: &str = "id, run_id, job_name, target_date, status, summary, details_json,
    started_at, finished_at, logged_at, version, origin";

fn text_column<T: FromStr<Err = UnknownValue>>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLog> {
    let id: i64 = row.get(0)?;
    let details: String = row.get(6)?;
    Ok(ExecutionLog {
        id,
        run_id: row.get(1)?,
        job_name: row.get(2)?,
        target_date: row.get(3)?,
        status: text_column(row, 4)?,
        summary: row.get(5)?,
        details: LogDetails::parse(id, &details),
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        logged_at: row.get(9)?,
        version: row.get(10)?,
        origin: text_column(row, 11)?,
    })
}

/// Filter for [`LogStore::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub date: Option<NaiveDate>,
    pub job_name: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogPage {
    pub rows: Vec<ExecutionLog>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Where a resend result ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub log_id: i64,
    /// `true` when no log of record existed and one was created.
    pub created: bool,
}

/// A running claim on the log of record. `version` is the row version the
/// claim wrote; [`LogStore::finish`] compares against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub id: i64,
    pub version: i64,
}

#[derive(Clone)]
pub struct LogStore {
    pool: Pool,
    job_name: String,
}

impl LogStore {
    pub fn new(pool: Pool, job_name: impl Into<String>) -> Self {
        Self {
            pool,
            job_name: job_name.into(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Mark the log of record for `target_date` as running.
    /// A previous row for the same date is reused and becomes a run row; its
    /// details are kept until [`LogStore::finish`] replaces them.
    pub fn claim(&self, run_id: &str, target_date: NaiveDate) -> Result<Claim> {
        let conn = self.pool.get().context("Failed to get DB connection")?;
        let now = Utc::now();
        let summary = format!("Surgery notifications for {}: running", target_date);
        let claim = conn
            .query_row(
                "INSERT INTO execution_logs
                    (run_id, job_name, target_date, status, summary, started_at, logged_at, origin)
                 VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?5, 'run')
                 ON CONFLICT (job_name, target_date) DO UPDATE SET
                    run_id = excluded.run_id,
                    status = 'running',
                    summary = excluded.summary,
                    started_at = excluded.started_at,
                    finished_at = NULL,
                    logged_at = excluded.logged_at,
                    origin = 'run',
                    version = version + 1
                 RETURNING id, version",
                params![run_id, self.job_name, target_date, summary, now],
                |row| {
                    Ok(Claim {
                        id: row.get(0)?,
                        version: row.get(1)?,
                    })
                },
            )
            .context("Failed to claim execution log")?;
        Ok(claim)
    }

    /// Move a claimed row to a terminal status. `details` of `None` keeps
    /// whatever the row already holds.
    ///
    /// If the row version moved since the claim, resends merged it while the
    /// run was sending: their ward entries (resent after the claim started)
    /// and summary notes are carried over instead of being overwritten.
    pub fn finish(
        &self,
        claim: &Claim,
        status: LogStatus,
        summary: &str,
        details: Option<&LogDetails>,
    ) -> Result<()> {
        let mut conn = self.pool.get().context("Failed to get DB connection")?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (version, stored_summary, raw, started_at): (i64, String, String, DateTime<Utc>) = tx
            .query_row(
                "SELECT version, summary, details_json, started_at FROM execution_logs WHERE id = ?1",
                params![claim.id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?
            .with_context(|| format!("execution log {} not found", claim.id))?;

        let mut summary = summary.to_string();
        let mut details = details.cloned();
        if version != claim.version {
            warn!(
                log_id = claim.id,
                claimed = claim.version,
                current = version,
                "execution log changed during run, keeping concurrent resends"
            );
            let stored = LogDetails::parse(claim.id, &raw);
            if let Some(d) = details.as_mut() {
                for room in stored
                    .rooms
                    .into_iter()
                    .filter(|r| r.resent_at.is_some_and(|t| t >= started_at))
                {
                    d.upsert(room);
                }
            }
            // First line is the claim's own placeholder.
            for note in stored_summary.lines().skip(1) {
                summary.push('\n');
                summary.push_str(note);
            }
        }

        let details_json = details.as_ref().map(|d| serde_json::to_string(d)).transpose()?;
        let now = Utc::now();
        let changed = tx
            .execute(
                "UPDATE execution_logs
                 SET status = ?3, summary = ?4, details_json = COALESCE(?5, details_json),
                     finished_at = ?6, logged_at = ?6, version = version + 1
                 WHERE id = ?1 AND version = ?2",
                params![claim.id, version, status.as_str(), summary, details_json, now],
            )
            .context("Failed to finalize execution log")?;
        if changed == 0 {
            anyhow::bail!("execution log {} changed while finalizing", claim.id);
        }

        tx.commit().context("Failed to commit execution log")?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<ExecutionLog>> {
        let conn = self.pool.get().context("Failed to get DB connection")?;
        let log = conn
            .query_row(
                &format!("SELECT {} FROM execution_logs WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                map_row,
            )
            .optional()?;
        Ok(log)
    }

    /// The log of record for `target_date`, if any.
    pub fn find_for_date(&self, target_date: NaiveDate) -> Result<Option<ExecutionLog>> {
        let conn = self.pool.get().context("Failed to get DB connection")?;
        let log = conn
            .query_row(
                &format!(
                    "SELECT {} FROM execution_logs WHERE job_name = ?1 AND target_date = ?2",
                    SELECT_COLUMNS
                ),
                params![self.job_name, target_date],
                map_row,
            )
            .optional()
            .context("Failed to load execution log")?;
        Ok(log)
    }

    /// Upsert one ward's result into the log of record for `target_date`,
    /// appending `note` to its summary. Creates the row when none exists.
    ///
    /// Runs under an immediate transaction so concurrent resends for the same
    /// date serialize instead of overwriting each other's merge.
    pub fn merge_room_result(
        &self,
        run_id: &str,
        target_date: NaiveDate,
        result: RoomResult,
        note: &str,
    ) -> Result<MergeOutcome> {
        let mut conn = self.pool.get().context("Failed to get DB connection")?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let existing: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT id, summary, details_json FROM execution_logs
                 WHERE job_name = ?1 AND target_date = ?2",
                params![self.job_name, target_date],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((id, summary, raw)) => {
                let mut details = LogDetails::parse(id, &raw);
                details.upsert(result);
                let summary = if summary.is_empty() {
                    note.to_string()
                } else {
                    format!("{}\n{}", summary, note)
                };
                tx.execute(
                    "UPDATE execution_logs
                     SET summary = ?2, details_json = ?3, logged_at = ?4, version = version + 1
                     WHERE id = ?1",
                    params![id, summary, serde_json::to_string(&details)?, now],
                )?;
                MergeOutcome { log_id: id, created: false }
            }
            None => {
                let status = if result.status == RoomStatus::Sent {
                    LogStatus::Success
                } else {
                    LogStatus::Error
                };
                let details = LogDetails { rooms: vec![result] };
                tx.execute(
                    "INSERT INTO execution_logs
                        (run_id, job_name, target_date, status, summary, details_json,
                         started_at, finished_at, logged_at, origin)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7, 'resend')",
                    params![
                        run_id,
                        self.job_name,
                        target_date,
                        status.as_str(),
                        note,
                        serde_json::to_string(&details)?,
                        now
                    ],
                )?;
                MergeOutcome {
                    log_id: tx.last_insert_rowid(),
                    created: true,
                }
            }
        };

        tx.commit().context("Failed to commit execution log merge")?;
        Ok(outcome)
    }

    /// Paginated raw rows, newest first.
    pub fn list(&self, filter: &LogFilter) -> Result<LogPage> {
        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter.page_size.unwrap_or(20).clamp(1, 100);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let conn = self.pool.get().context("Failed to get DB connection")?;
        let where_clause = "WHERE (?1 IS NULL OR target_date = ?1) AND (?2 IS NULL OR job_name = ?2)";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM execution_logs {}", where_clause),
            params![filter.date, filter.job_name],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM execution_logs {} ORDER BY logged_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            SELECT_COLUMNS, where_clause
        ))?;
        let rows = stmt
            .query_map(
                params![filter.date, filter.job_name, i64::from(page_size), offset],
                map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(LogPage {
            rows,
            total: total as u64,
            page,
            page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_memory_pool;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn result(room: &str, status: RoomStatus, count: usize) -> RoomResult {
        RoomResult {
            room: room.to_string(),
            phone: Some("0901".to_string()),
            status,
            surgery_count: count,
            response: None,
            reason: None,
            resent_at: None,
        }
    }

    #[test]
    fn test_claim_then_finish() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        let claim = store.claim("run-1", date(20)).unwrap();
        let log = store.get(claim.id).unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Running);
        assert_eq!(log.origin, LogOrigin::Run);
        assert!(log.finished_at.is_none());
        assert!(!log.is_completed_run());

        let details = LogDetails {
            rooms: vec![result("Ward A", RoomStatus::Sent, 3)],
        };
        store.finish(&claim, LogStatus::Success, "done", Some(&details)).unwrap();

        let log = store.find_for_date(date(20)).unwrap().unwrap();
        assert_eq!(log.id, claim.id);
        assert_eq!(log.status, LogStatus::Success);
        assert_eq!(log.details, details);
        assert_eq!(log.summary, "done");
        assert!(log.finished_at.is_some());
        assert!(log.is_completed_run());
    }

    #[test]
    fn test_reclaim_reuses_row_of_record() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        let first = store.claim("run-1", date(20)).unwrap();
        let second = store.claim("run-2", date(20)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.version, 1);
        let log = store.get(first.id).unwrap().unwrap();
        assert_eq!(log.run_id, "run-2");
        assert_eq!(log.version, 1);
    }

    #[test]
    fn test_find_is_exact_per_date_and_job() {
        let pool = open_memory_pool().unwrap();
        let store = LogStore::new(pool.clone(), "job");
        let other = LogStore::new(pool, "other-job");
        store.claim("r", date(2)).unwrap();
        other.claim("r", date(20)).unwrap();

        assert!(store.find_for_date(date(20)).unwrap().is_none());
        assert!(store.find_for_date(date(2)).unwrap().is_some());
    }

    #[test]
    fn test_merge_replaces_existing_room() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        let claim = store.claim("run-1", date(20)).unwrap();
        let id = claim.id;
        let details = LogDetails {
            rooms: vec![
                result("Ward A", RoomStatus::SendFailed, 2),
                result("Ward B", RoomStatus::Sent, 1),
            ],
        };
        store.finish(&claim, LogStatus::Success, "initial", Some(&details)).unwrap();

        let merged = store
            .merge_room_result("resend", date(20), result("Ward A", RoomStatus::Sent, 3), "resent A")
            .unwrap();
        assert_eq!(merged, MergeOutcome { log_id: id, created: false });

        let log = store.get(id).unwrap().unwrap();
        assert_eq!(log.details.rooms.len(), 2);
        let a = log.details.room("Ward A").unwrap();
        assert_eq!(a.status, RoomStatus::Sent);
        assert_eq!(a.surgery_count, 3);
        assert_eq!(log.summary, "initial\nresent A");
        assert_eq!(log.origin, LogOrigin::Run);
    }

    #[test]
    fn test_merge_creates_row_when_missing() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        let merged = store
            .merge_room_result("resend", date(21), result("Ward C", RoomStatus::SendFailed, 1), "note")
            .unwrap();
        assert!(merged.created);

        let log = store.find_for_date(date(21)).unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Error);
        assert_eq!(log.details.rooms.len(), 1);
        assert_eq!(log.summary, "note");
        assert_eq!(log.origin, LogOrigin::Resend);
    }

    #[test]
    fn test_resend_created_row_is_not_a_completed_run() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        store
            .merge_room_result("resend", date(22), result("Ward A", RoomStatus::Sent, 1), "note")
            .unwrap();
        let log = store.find_for_date(date(22)).unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Success);
        assert!(!log.is_completed_run());

        // A run claiming the row takes it over.
        let claim = store.claim("run-1", date(22)).unwrap();
        assert_eq!(claim.id, log.id);
        store.finish(&claim, LogStatus::Success, "done", Some(&LogDetails::default())).unwrap();
        let log = store.get(claim.id).unwrap().unwrap();
        assert_eq!(log.origin, LogOrigin::Run);
        assert!(log.is_completed_run());
    }

    #[test]
    fn test_finish_keeps_resend_merged_during_run() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        let claim = store.claim("run-1", date(20)).unwrap();

        let mut resent = result("Ward A", RoomStatus::Sent, 4);
        resent.resent_at = Some(Utc::now());
        store
            .merge_room_result("resend", date(20), resent, "Manual resend to Ward A")
            .unwrap();

        let details = LogDetails {
            rooms: vec![
                result("Ward A", RoomStatus::SendFailed, 3),
                result("Ward B", RoomStatus::Sent, 1),
            ],
        };
        store.finish(&claim, LogStatus::Success, "run done", Some(&details)).unwrap();

        let log = store.get(claim.id).unwrap().unwrap();
        let a = log.details.room("Ward A").unwrap();
        assert_eq!(a.status, RoomStatus::Sent);
        assert_eq!(a.surgery_count, 4);
        assert_eq!(log.details.room("Ward B").unwrap().status, RoomStatus::Sent);
        assert_eq!(log.summary, "run done\nManual resend to Ward A");
        assert_eq!(log.version, claim.version + 2);
    }

    #[test]
    fn test_finish_missing_row_fails() {
        let store = LogStore::new(open_memory_pool().unwrap(), "job");
        let claim = Claim { id: 99, version: 0 };
        assert!(store.finish(&claim, LogStatus::Success, "x", None).is_err());
    }

    #[test]
    fn test_list_filters_and_paginates() {
        let pool = open_memory_pool().unwrap();
        let store = LogStore::new(pool.clone(), "job");
        let other = LogStore::new(pool, "other-job");
        for d in 1..=5 {
            store.claim("r", date(d)).unwrap();
        }
        other.claim("r", date(1)).unwrap();

        let all = store.list(&LogFilter::default()).unwrap();
        assert_eq!(all.total, 6);

        let page = store
            .list(&LogFilter {
                job_name: Some("job".to_string()),
                page: Some(2),
                page_size: Some(2),
                ..LogFilter::default()
            })
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.page, 2);

        let by_date = store
            .list(&LogFilter {
                date: Some(date(1)),
                ..LogFilter::default()
            })
            .unwrap();
        assert_eq!(by_date.total, 2);
    }

    #[test]
    fn test_corrupt_details_read_as_empty() {
        let pool = open_memory_pool().unwrap();
        let store = LogStore::new(pool.clone(), "job");
        let id = store.claim("r", date(20)).unwrap().id;
        pool.get()
            .unwrap()
            .execute(
                "UPDATE execution_logs SET details_json = 'not json' WHERE id = ?1",
                params![id],
            )
            .unwrap();
        assert!(store.get(id).unwrap().unwrap().details.rooms.is_empty());
    }

    #[test]
    fn test_unknown_status_is_a_read_error() {
        let pool = open_memory_pool().unwrap();
        let store = LogStore::new(pool.clone(), "job");
        let id = store.claim("r", date(20)).unwrap().id;
        pool.get()
            .unwrap()
            .execute(
                "UPDATE execution_logs SET status = 'finished' WHERE id = ?1",
                params![id],
            )
            .unwrap();
        assert!(store.get(id).is_err());
        assert!(store.find_for_date(date(20)).is_err());
    }
}
