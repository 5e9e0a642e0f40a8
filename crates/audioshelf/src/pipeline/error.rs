use std::path::PathBuf;
use thiserror::Error;

/// Why a job failed. The `Display` text is what lands in the job's `error`
/// field, so every variant reads as a complete sentence fragment.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("Voucher at '{0}' has no key or IV")]
    IncompleteVoucher(PathBuf),

    #[error(transparent)]
    Store(#[from] crate::jobs::StoreError),

    #[error(transparent)]
    Provider(#[from] crate::provider::ProviderError),

    #[error(transparent)]
    Credential(#[from] crate::provider::CredentialError),

    #[error(transparent)]
    Storage(#[from] crate::error::StorageError),

    #[error(transparent)]
    Transcode(#[from] crate::transcode::TranscodeError),
}
