//! Submission entry repository: the per-directory ledger.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{EntryCounts, EntryStatus, PackageTier, SubmissionEntry};

/// A raw submission entry row.
#[derive(Debug, Clone)]
pub struct EntryRow {
    pub id: String,
    pub job_id: String,
    pub directory_id: String,
    pub position: u32,
    pub status: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result_url: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            directory_id: row.get("directory_id")?,
            position: row.get("position")?,
            status: row.get("status")?,
            attempt_count: row.get("attempt_count")?,
            max_attempts: row.get("max_attempts")?,
            last_error: row.get("last_error")?,
            result_url: row.get("result_url")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn into_entry(self) -> Result<SubmissionEntry, DatabaseError> {
        let status = EntryStatus::parse(&self.status).ok_or_else(|| DatabaseError::Corrupt {
            column: "status",
            value: self.status.clone(),
        })?;
        Ok(SubmissionEntry {
            id: self.id,
            job_id: self.job_id,
            directory_id: self.directory_id,
            position: self.position,
            status,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            last_error: self.last_error,
            result_url: self.result_url,
            started_at: self.started_at.as_deref().map(parse_timestamp),
            completed_at: self.completed_at.as_deref().map(parse_timestamp),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

/// One directory to materialize into the ledger.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub directory_id: String,
    pub position: u32,
    pub max_attempts: u32,
}

/// Creates `pending` entries for a job. Idempotent: existing entries are
/// kept, and entries left `in_progress` by a previous holder are reset to
/// `pending`. Open entries lose their `started_at`, so time spent between
/// holders is not counted as processing time. Never creates more entries
/// than the job's `directory_limit`.
///
/// Returns the number of entries newly created.
pub fn materialize(
    db: &Database,
    job_id: &str,
    entries: &[NewEntry],
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let mut created = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO submission_entries
                 (id, job_id, directory_id, position, status, attempt_count, max_attempts, updated_at)
                 SELECT ?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6
                 WHERE (SELECT COUNT(*) FROM submission_entries WHERE job_id = ?2)
                     < (SELECT directory_limit FROM jobs WHERE id = ?2)",
            )?;
            for entry in entries {
                created += stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    job_id,
                    entry.directory_id,
                    entry.position,
                    entry.max_attempts,
                    ts,
                ])?;
            }
        }
        tx.execute(
            "UPDATE submission_entries SET status = 'pending', started_at = NULL, updated_at = ?2
             WHERE job_id = ?1 AND status IN ('pending', 'in_progress')",
            params![job_id, ts],
        )?;
        tx.commit()?;
        Ok(created)
    })
}

/// Lists a job's entries in processing order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<EntryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM submission_entries WHERE job_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], EntryRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn find(
    db: &Database,
    job_id: &str,
    directory_id: &str,
) -> Result<Option<EntryRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM submission_entries WHERE job_id = ?1 AND directory_id = ?2",
                params![job_id, directory_id],
                EntryRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// `pending -> in_progress`. Keeps the first `started_at`.
pub fn mark_in_progress(
    db: &Database,
    job_id: &str,
    directory_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE submission_entries
             SET status = 'in_progress', started_at = COALESCE(started_at, ?3), updated_at = ?3
             WHERE job_id = ?1 AND directory_id = ?2 AND status = 'pending'",
            params![job_id, directory_id, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// Records a successful attempt on a non-terminal entry.
pub fn record_success(
    db: &Database,
    job_id: &str,
    directory_id: &str,
    result_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE submission_entries
             SET status = 'succeeded', attempt_count = attempt_count + 1, result_url = ?3,
                 started_at = COALESCE(started_at, ?4), completed_at = ?4, updated_at = ?4
             WHERE job_id = ?1 AND directory_id = ?2 AND status IN ('pending', 'in_progress')",
            params![job_id, directory_id, result_url, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// Records a failed attempt on a non-terminal entry.
///
/// The entry becomes `failed` when the failure is permanent or the attempt
/// budget is spent, otherwise it goes back to `pending` for a retry.
pub fn record_failure(
    db: &Database,
    job_id: &str,
    directory_id: &str,
    error: &str,
    permanent: bool,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE submission_entries
             SET attempt_count = attempt_count + 1,
                 last_error = ?3,
                 status = CASE WHEN ?4 OR attempt_count + 1 >= max_attempts
                     THEN 'failed' ELSE 'pending' END,
                 completed_at = CASE WHEN ?4 OR attempt_count + 1 >= max_attempts
                     THEN ?5 ELSE NULL END,
                 started_at = COALESCE(started_at, ?5),
                 updated_at = ?5
             WHERE job_id = ?1 AND directory_id = ?2 AND status IN ('pending', 'in_progress')",
            params![job_id, directory_id, error, permanent, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// Marks every non-terminal entry of a job as `skipped`.
pub fn skip_remaining(
    db: &Database,
    job_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE submission_entries
             SET status = 'skipped', last_error = ?2, completed_at = ?3, updated_at = ?3
             WHERE job_id = ?1 AND status IN ('pending', 'in_progress')",
            params![job_id, reason, format_timestamp(now)],
        )?;
        Ok(changed)
    })
}

/// Counts a job's entries per status.
pub fn counts_for_job(db: &Database, job_id: &str) -> Result<EntryCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM submission_entries WHERE job_id = ?1 GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, u32>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = EntryCounts::default();
        for (status, n) in rows {
            let status = EntryStatus::parse(&status).ok_or(DatabaseError::Corrupt {
                column: "status",
                value: status,
            })?;
            counts.add(status, n);
        }
        Ok(counts)
    })
}

/// Processing durations in seconds of the most recently finished entries
/// (succeeded or failed) belonging to jobs of the given tier.
pub fn recent_durations(
    db: &Database,
    tier: PackageTier,
    window: u32,
) -> Result<Vec<f64>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT e.started_at, e.completed_at FROM submission_entries e
             JOIN jobs j ON j.id = e.job_id
             WHERE j.package_tier = ?1
               AND e.status IN ('succeeded', 'failed')
               AND e.started_at IS NOT NULL AND e.completed_at IS NOT NULL
             ORDER BY e.completed_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![tier.as_str(), window], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .iter()
            .map(|(started, completed)| {
                let elapsed = parse_timestamp(completed) - parse_timestamp(started);
                (elapsed.num_milliseconds().max(0) as f64) / 1000.0
            })
            .collect())
    })
}
