pub mod manager;

pub use manager::{EnqueueRequest, QueueCounts, QueueManager};
