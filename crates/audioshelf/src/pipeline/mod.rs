pub mod convert;
pub mod download;
pub mod error;
pub mod polling;
pub mod progress;
pub mod recovery;

pub use convert::ConvertWorker;
pub use download::DownloadWorker;
pub use error::PipelineError;
pub use polling::{run_polling_loop, PollTiming, WorkerHandle};
pub use progress::{NoopProgress, ProgressBand, ProgressReporter, StoreProgress};
pub use recovery::{RecoveryManager, RecoveryReport};
