//! The single-row, versioned control record.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::ControlSnapshot;

fn read_row(conn: &Connection) -> Result<ControlSnapshot, DatabaseError> {
    let (emergency_stop, queue_paused, reason, version, updated_at) = conn.query_row(
        "SELECT emergency_stop, queue_paused, reason, version, updated_at
         FROM control_state WHERE id = 1",
        [],
        |r| {
            Ok((
                r.get::<_, bool>(0)?,
                r.get::<_, bool>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
            ))
        },
    )?;
    Ok(ControlSnapshot {
        emergency_stop,
        queue_paused,
        reason,
        version,
        updated_at: parse_timestamp(&updated_at),
    })
}

pub fn read(db: &Database) -> Result<ControlSnapshot, DatabaseError> {
    db.with_conn(read_row)
}

/// Sets the emergency stop flag. The version only moves when the flag
/// actually changes. Returns the record after the write.
pub fn set_emergency_stop(
    db: &Database,
    active: bool,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ControlSnapshot, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE control_state
             SET emergency_stop = ?1, reason = ?2, version = version + 1, updated_at = ?3
             WHERE id = 1 AND emergency_stop != ?1",
            params![active, reason, format_timestamp(now)],
        )?;
        read_row(conn)
    })
}

/// Sets the queue-paused flag. Same versioning rule as the emergency stop.
pub fn set_queue_paused(
    db: &Database,
    paused: bool,
    now: DateTime<Utc>,
) -> Result<ControlSnapshot, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE control_state
             SET queue_paused = ?1, version = version + 1, updated_at = ?2
             WHERE id = 1 AND queue_paused != ?1",
            params![paused, format_timestamp(now)],
        )?;
        read_row(conn)
    })
}
