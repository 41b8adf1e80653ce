//! Job repository: CRUD and lifecycle transitions for the `jobs` table.
//!
//! Every status change is a conditional `UPDATE` whose `WHERE` clause lists
//! the legal source states taken from [`JobStatus::sources_of`]. A return of
//! `false` (zero rows changed) means another worker or process got there
//! first.

use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{Job, JobStatus, PackageTier};
use chrono::{DateTime, Utc};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub customer_id: String,
    pub package_tier: String,
    pub directory_limit: u32,
    pub priority: i64,
    pub status: String,
    pub directory_ids: String,
    pub release_count: u32,
    pub claimed_by: Option<String>,
    pub error_summary: Option<String>,
    pub created_at: String,
    pub claimed_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            package_tier: row.get("package_tier")?,
            directory_limit: row.get("directory_limit")?,
            priority: row.get("priority")?,
            status: row.get("status")?,
            directory_ids: row.get("directory_ids")?,
            release_count: row.get("release_count")?,
            claimed_by: row.get("claimed_by")?,
            error_summary: row.get("error_summary")?,
            created_at: row.get("created_at")?,
            claimed_at: row.get("claimed_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Builds the row for a freshly enqueued job.
    pub fn new_queued(
        id: &str,
        customer_id: &str,
        tier: PackageTier,
        priority: i64,
        directory_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Self, DatabaseError> {
        let encoded = serde_json::to_string(directory_ids).map_err(|e| DatabaseError::Corrupt {
            column: "directory_ids",
            value: e.to_string(),
        })?;
        let ts = format_timestamp(now);
        Ok(Self {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            package_tier: tier.as_str().to_string(),
            directory_limit: directory_ids.len() as u32,
            priority,
            status: JobStatus::Queued.as_str().to_string(),
            directory_ids: encoded,
            release_count: 0,
            claimed_by: None,
            error_summary: None,
            created_at: ts.clone(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            updated_at: ts,
        })
    }

    /// Decodes the raw row into the domain type.
    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let package_tier = self
            .package_tier
            .parse::<PackageTier>()
            .map_err(|_| DatabaseError::Corrupt {
                column: "package_tier",
                value: self.package_tier.clone(),
            })?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| DatabaseError::Corrupt {
            column: "status",
            value: self.status.clone(),
        })?;
        let directory_ids: Vec<String> =
            serde_json::from_str(&self.directory_ids).map_err(|_| DatabaseError::Corrupt {
                column: "directory_ids",
                value: self.directory_ids.clone(),
            })?;

        Ok(Job {
            id: self.id,
            customer_id: self.customer_id,
            package_tier,
            directory_limit: self.directory_limit,
            priority: self.priority,
            status,
            directory_ids,
            release_count: self.release_count,
            claimed_by: self.claimed_by,
            error_summary: self.error_summary,
            created_at: parse_timestamp(&self.created_at),
            claimed_at: self.claimed_at.as_deref().map(parse_timestamp),
            started_at: self.started_at.as_deref().map(parse_timestamp),
            completed_at: self.completed_at.as_deref().map(parse_timestamp),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub customer_id: Option<String>,
    pub package_tier: Option<PackageTier>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Renders a list of states as a SQL `IN (...)` body.
///
/// Only ever fed with `JobStatus` constants, never user input.
fn status_list(statuses: &[JobStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, customer_id, package_tier, directory_limit, priority, status,
             directory_ids, release_count, claimed_by, error_summary, created_at, claimed_at,
             started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.customer_id,
                job.package_tier,
                job.directory_limit,
                job.priority,
                job.status,
                job.directory_ids,
                job.release_count,
                job.claimed_by,
                job.error_summary,
                job.created_at,
                job.claimed_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(ref customer_id) = filter.customer_id {
            conditions.push(format!("customer_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(customer_id.clone()));
        }
        if let Some(tier) = filter.package_tier {
            conditions.push(format!("package_tier = ?{}", param_values.len() + 1));
            param_values.push(Box::new(tier.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs grouped by status. States with no jobs are omitted.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the id of the job that should be dispatched next, if any.
pub fn next_candidate(db: &Database) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let id = conn
            .query_row(
                "SELECT id FROM jobs WHERE status = 'queued'
                 ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1",
                [],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    })
}

/// Compare-and-swap `queued -> claimed`. Returns `true` if this caller won.
pub fn try_claim(
    db: &Database,
    id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE jobs SET status = 'claimed', claimed_by = ?2, claimed_at = ?3, updated_at = ?3
         WHERE id = ?1 AND status IN ({})",
        status_list(&JobStatus::sources_of(JobStatus::Claimed))
    );
    db.with_conn(|conn| {
        let changed = conn.execute(&sql, params![id, worker_id, format_timestamp(now)])?;
        Ok(changed == 1)
    })
}

/// Whether `worker_id` still holds the claim on the job.
pub fn is_held_by(db: &Database, id: &str, worker_id: &str) -> Result<bool, DatabaseError> {
    let sql = format!(
        "SELECT COUNT(*) FROM jobs WHERE id = ?1 AND claimed_by = ?2 AND status IN ({})",
        status_list(&[JobStatus::Claimed, JobStatus::Processing])
    );
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(&sql, params![id, worker_id], |r| r.get(0))?;
        Ok(count == 1)
    })
}

/// Ids of jobs currently held (claimed or processing) by a worker.
pub fn held_by(db: &Database, worker_id: &str) -> Result<Vec<String>, DatabaseError> {
    let sql = format!(
        "SELECT id FROM jobs WHERE claimed_by = ?1 AND status IN ({}) ORDER BY claimed_at",
        status_list(&[JobStatus::Claimed, JobStatus::Processing])
    );
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![worker_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Held jobs whose holder is registered as offline, as `(job_id, worker_id)`.
/// These are left behind when a sweep marked the worker offline but failed
/// before releasing its jobs.
pub fn held_by_offline_workers(db: &Database) -> Result<Vec<(String, String)>, DatabaseError> {
    let sql = format!(
        "SELECT j.id, j.claimed_by FROM jobs j
         JOIN worker_registrations w ON w.worker_id = j.claimed_by
         WHERE w.status = 'offline' AND j.status IN ({})
         ORDER BY j.claimed_at",
        status_list(&[JobStatus::Claimed, JobStatus::Processing])
    );
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let held = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(held)
    })
}

/// Fenced `claimed -> processing`. Keeps the first `started_at` across re-claims.
pub fn mark_processing(
    db: &Database,
    id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE jobs SET status = 'processing', started_at = COALESCE(started_at, ?3), updated_at = ?3
         WHERE id = ?1 AND claimed_by = ?2 AND status IN ({})",
        status_list(&JobStatus::sources_of(JobStatus::Processing))
    );
    db.with_conn(|conn| {
        let changed = conn.execute(&sql, params![id, worker_id, format_timestamp(now)])?;
        Ok(changed == 1)
    })
}

/// Fenced move to a terminal roll-up state (`completed` or `failed`).
pub fn finish(
    db: &Database,
    id: &str,
    worker_id: &str,
    status: JobStatus,
    error_summary: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let sources = JobStatus::sources_of(status);
    if sources.is_empty() || !status.is_terminal() {
        return Ok(false);
    }
    let sql = format!(
        "UPDATE jobs SET status = ?3, error_summary = ?4, completed_at = ?5, updated_at = ?5
         WHERE id = ?1 AND claimed_by = ?2 AND status IN ({})",
        status_list(&sources)
    );
    db.with_conn(|conn| {
        let changed = conn.execute(
            &sql,
            params![
                id,
                worker_id,
                status.as_str(),
                error_summary,
                format_timestamp(now)
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Returns a held job to the queue, or to `stalled` once it has been
/// released more than `max_release_count` times.
///
/// With `holder` set the release only applies while that worker still holds
/// the claim. Returns the resulting status, or `None` if nothing changed.
pub fn release(
    db: &Database,
    id: &str,
    holder: Option<&str>,
    reason: &str,
    max_release_count: u32,
    now: DateTime<Utc>,
) -> Result<Option<JobStatus>, DatabaseError> {
    let sql = format!(
        "UPDATE jobs SET
            release_count = release_count + 1,
            status = CASE WHEN release_count + 1 > ?3 THEN 'stalled' ELSE 'queued' END,
            error_summary = CASE WHEN release_count + 1 > ?3
                THEN 'stalled after ' || (release_count + 1) || ' releases: ' || ?4
                ELSE error_summary END,
            completed_at = CASE WHEN release_count + 1 > ?3 THEN ?5 ELSE completed_at END,
            claimed_by = NULL,
            claimed_at = NULL,
            updated_at = ?5
         WHERE id = ?1 AND (?2 IS NULL OR claimed_by = ?2) AND status IN ({})",
        status_list(&JobStatus::sources_of(JobStatus::Queued))
    );
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            &sql,
            params![id, holder, max_release_count, reason, format_timestamp(now)],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let status: String =
            tx.query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| {
                r.get(0)
            })?;
        tx.commit()?;
        JobStatus::parse(&status)
            .map(Some)
            .ok_or(DatabaseError::Corrupt {
                column: "status",
                value: status,
            })
    })
}
