//! Jobs, books, and the stage machine that moves jobs through the pipeline.

pub mod stage;
pub mod store;

pub use stage::{JobStatus, Stage, CONVERT_ENTRY_PROGRESS, DOWNLOAD_ENTRY_PROGRESS};
pub use store::{Book, BookRecord, Job, JobStore, StoreError, User};
