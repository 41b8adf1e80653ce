pub mod job_events;

pub use job_events::{
    BroadcastProgress, JobEvent, JobEventBroadcaster, JobEventKind, NoopProgress, ProgressSink,
};
