//! Operator controls: emergency stop and queue pause.

use chrono::Utc;

use crate::db::{control_repo, Database, DatabaseError};
use crate::model::ControlSnapshot;

/// Writes and reads the durable control record. Workers observe it on
/// every heartbeat and at every directory boundary.
#[derive(Clone)]
pub struct ControlPlane {
    db: Database,
}

impl ControlPlane {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Halts new claims and aborts in-flight jobs at their next directory.
    pub fn emergency_stop(&self, reason: &str) -> Result<ControlSnapshot, DatabaseError> {
        let snapshot = control_repo::set_emergency_stop(&self.db, true, Some(reason), Utc::now())?;
        log::warn!(
            "Emergency stop engaged (version {}): {}",
            snapshot.version,
            reason
        );
        Ok(snapshot)
    }

    pub fn clear_emergency_stop(&self) -> Result<ControlSnapshot, DatabaseError> {
        let snapshot = control_repo::set_emergency_stop(&self.db, false, None, Utc::now())?;
        log::info!("Emergency stop cleared (version {})", snapshot.version);
        Ok(snapshot)
    }

    /// Stops handing out new jobs. In-flight jobs continue.
    pub fn pause_queue(&self) -> Result<ControlSnapshot, DatabaseError> {
        let snapshot = control_repo::set_queue_paused(&self.db, true, Utc::now())?;
        log::info!("Queue paused (version {})", snapshot.version);
        Ok(snapshot)
    }

    pub fn resume_queue(&self) -> Result<ControlSnapshot, DatabaseError> {
        let snapshot = control_repo::set_queue_paused(&self.db, false, Utc::now())?;
        log::info!("Queue resumed (version {})", snapshot.version);
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> Result<ControlSnapshot, DatabaseError> {
        control_repo::read(&self.db)
    }
}
