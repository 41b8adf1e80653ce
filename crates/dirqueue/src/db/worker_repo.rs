//! Worker registration repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{WorkerRegistration, WorkerStatus};

/// A raw worker registration row.
#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub worker_id: String,
    pub status: String,
    pub current_job_id: Option<String>,
    pub last_heartbeat_at: String,
    pub registered_at: String,
    pub control_version_seen: i64,
}

impl WorkerRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            worker_id: row.get("worker_id")?,
            status: row.get("status")?,
            current_job_id: row.get("current_job_id")?,
            last_heartbeat_at: row.get("last_heartbeat_at")?,
            registered_at: row.get("registered_at")?,
            control_version_seen: row.get("control_version_seen")?,
        })
    }

    pub fn into_registration(self) -> Result<WorkerRegistration, DatabaseError> {
        let status = WorkerStatus::parse(&self.status).ok_or_else(|| DatabaseError::Corrupt {
            column: "status",
            value: self.status.clone(),
        })?;
        Ok(WorkerRegistration {
            worker_id: self.worker_id,
            status,
            current_job_id: self.current_job_id,
            last_heartbeat_at: parse_timestamp(&self.last_heartbeat_at),
            registered_at: parse_timestamp(&self.registered_at),
            control_version_seen: self.control_version_seen,
        })
    }
}

/// Records a heartbeat, creating the registration on first contact.
///
/// A worker previously marked `offline` comes back as `idle` with no job,
/// whatever it reports: its claim was already released. Reporting `idle`
/// clears `current_job_id`.
pub fn upsert_heartbeat(
    db: &Database,
    worker_id: &str,
    reported: WorkerStatus,
    control_version: i64,
    now: DateTime<Utc>,
) -> Result<WorkerRow, DatabaseError> {
    let ts = format_timestamp(now);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO worker_registrations
                (worker_id, status, current_job_id, last_heartbeat_at, registered_at, control_version_seen)
             VALUES (?1, ?2, NULL, ?3, ?3, ?4)
             ON CONFLICT (worker_id) DO UPDATE SET
                status = CASE WHEN worker_registrations.status = 'offline'
                    THEN 'idle' ELSE excluded.status END,
                current_job_id = CASE
                    WHEN worker_registrations.status = 'offline' OR excluded.status = 'idle'
                    THEN NULL ELSE worker_registrations.current_job_id END,
                last_heartbeat_at = excluded.last_heartbeat_at,
                control_version_seen = excluded.control_version_seen",
            params![worker_id, reported.as_str(), ts, control_version],
        )?;
        let row = conn.query_row(
            "SELECT * FROM worker_registrations WHERE worker_id = ?1",
            params![worker_id],
            WorkerRow::from_row,
        )?;
        Ok(row)
    })
}

/// Sets status and current job for a worker that is not offline.
pub fn set_assignment(
    db: &Database,
    worker_id: &str,
    status: WorkerStatus,
    current_job_id: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE worker_registrations SET status = ?2, current_job_id = ?3
             WHERE worker_id = ?1 AND status != 'offline'",
            params![worker_id, status.as_str(), current_job_id],
        )?;
        Ok(changed == 1)
    })
}

/// Workers not yet offline whose last heartbeat is older than `cutoff`.
pub fn find_expired(db: &Database, cutoff: DateTime<Utc>) -> Result<Vec<WorkerRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM worker_registrations
             WHERE status != 'offline' AND last_heartbeat_at < ?1
             ORDER BY last_heartbeat_at ASC",
        )?;
        let rows = stmt
            .query_map(params![format_timestamp(cutoff)], WorkerRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks a worker offline. With `cutoff` set the update only applies while
/// the last heartbeat is still older than it, so a heartbeat that lands
/// between detection and this call wins. Returns `true` if this call made
/// the transition.
pub fn mark_offline(
    db: &Database,
    worker_id: &str,
    cutoff: Option<DateTime<Utc>>,
) -> Result<bool, DatabaseError> {
    let cutoff = cutoff.map(format_timestamp);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE worker_registrations SET status = 'offline', current_job_id = NULL
             WHERE worker_id = ?1 AND status != 'offline'
               AND (?2 IS NULL OR last_heartbeat_at < ?2)",
            params![worker_id, cutoff],
        )?;
        Ok(changed == 1)
    })
}

pub fn find(db: &Database, worker_id: &str) -> Result<Option<WorkerRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM worker_registrations WHERE worker_id = ?1",
                params![worker_id],
                WorkerRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn list(db: &Database) -> Result<Vec<WorkerRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM worker_registrations ORDER BY worker_id ASC")?;
        let rows = stmt
            .query_map([], WorkerRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
