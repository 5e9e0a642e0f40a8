//! Broadcasting of job progress for live front-end streaming.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent};
