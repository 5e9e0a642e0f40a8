//! Content provider and credential error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors talking to the content provider or fetching its assets.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Built through `From`, which drops the request URL: signed download
    /// URLs must not end up in a job's error text.
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Provider returned status {status} for {endpoint}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("Provider response is missing {0}")]
    MissingField(&'static str),

    #[error("Unsupported download URL: {0}")]
    UnsupportedUrl(String),

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid library JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// Errors resolving credential material.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Could not get activation bytes: no activation token in stored credentials")]
    MissingActivationToken,

    #[error("Could not get activation bytes: stored activation token is malformed")]
    InvalidActivationToken,
}
