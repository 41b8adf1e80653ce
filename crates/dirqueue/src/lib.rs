pub mod app;
pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod processor;
pub mod progress;
pub mod queue;

pub use app::DirQueue;
pub use broadcast::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use catalog::{Difficulty, Directory, DirectoryCatalog, StaticCatalog};
pub use config::{load_config, Config};
pub use coordinator::{ControlPlane, LivenessMonitor, WorkerCoordinator, WorkerRuntime};
pub use db::Database;
pub use error::{
    ConfigError, CoordinatorError, DirQueueError, ProcessError, QueueError, Result,
};
pub use model::{Job, JobStatus, PackageTier, SubmissionEntry, WorkerStatus};
pub use processor::{
    AttemptResult, FailureKind, SubmissionExecutor, SubmissionProcessor, SubmissionRequest,
};
pub use progress::{JobProgress, ProgressReporter};
pub use queue::{EnqueueRequest, QueueManager};
