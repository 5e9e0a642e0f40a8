//! JSON documents the download stage leaves for the convert stage.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// The `meta.json` handoff between the download and convert stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffMeta {
    pub content_id: String,
    pub title: String,
    /// Comma-joined author names, possibly empty.
    pub authors: String,
    pub decryption_mode_is_voucher: bool,
    pub audio_file_path: PathBuf,
    pub book_dir_path: PathBuf,
}

impl HandoffMeta {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        read_json(path, "meta handoff document")
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json(path, self)
    }
}

/// Per-download key material for voucher-mode decryption (`voucher.json`).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherDocument {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub iv: String,
}

impl std::fmt::Debug for VoucherDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VoucherDocument(<redacted>)")
    }
}

impl VoucherDocument {
    pub fn is_complete(&self) -> bool {
        !self.key.trim().is_empty() && !self.iv.trim().is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        read_json(path, "voucher")
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json(path, self)
    }
}

/// Reads a JSON document; a missing file is reported as
/// [`StorageError::Missing`] rather than a generic read failure.
pub fn read_json<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::Missing {
                what,
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(StorageError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode {
        what,
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    std::fs::write(path, json).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}
