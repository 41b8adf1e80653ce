//! Worker coordination: control plane, liveness and the worker runtime.

pub mod control;
pub mod liveness;
pub mod runtime;
pub mod workers;

pub use control::ControlPlane;
pub use liveness::LivenessMonitor;
pub use runtime::{RuntimeOptions, WorkerRuntime};
pub use workers::{ClaimedJob, HeartbeatAck, ReapReport, WorkerCoordinator};
