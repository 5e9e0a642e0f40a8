pub mod broadcast;
pub mod chapters;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod provider;
pub mod sanitize;
pub mod storage;
pub mod transcode;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{AudioshelfError, ConfigError, Result, StorageError, WorkerError};
pub use jobs::{Book, Job, JobStatus, JobStore, Stage, StoreError};
pub use pipeline::{ConvertWorker, DownloadWorker, PipelineError, RecoveryManager, WorkerHandle};
pub use provider::{
    BundleCredentialResolver, ContentProvider, CredentialBundle, CredentialResolver,
    HttpContentProvider,
};
pub use transcode::{FfmpegTranscoder, TranscodeStage, Transcoder};
