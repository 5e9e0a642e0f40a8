use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Exit {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to read probe output: {0}")]
    ProbeDecode(#[from] serde_json::Error),

    #[error("File operation failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcode worker pool stopped before finishing")]
    PoolStopped,
}
