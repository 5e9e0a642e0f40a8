//! Where a job's files live inside the artifact root.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

const JOB_DIR_PREFIX: &str = "job-";

/// Deterministic paths for one job's artifact directory.
///
/// The directory is named from the job id only, so titles never have to be
/// made filesystem-safe and two jobs can never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    dir: PathBuf,
}

impl ArtifactLayout {
    pub fn for_job(artifact_root: &Path, job_id: i64) -> Self {
        Self {
            dir: artifact_root.join(Self::dir_name(job_id)),
        }
    }

    pub fn dir_name(job_id: i64) -> String {
        format!("{}{}", JOB_DIR_PREFIX, job_id)
    }

    /// Parses a directory name produced by [`ArtifactLayout::dir_name`].
    pub fn job_id_from_dir_name(name: &str) -> Option<i64> {
        name.strip_prefix(JOB_DIR_PREFIX)?.parse().ok()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Source audio. Voucher-mode downloads are AAXC, legacy ones AAX.
    pub fn audio(&self, voucher_mode: bool) -> PathBuf {
        let name = if voucher_mode { "audio.aaxc" } else { "audio.aax" };
        self.dir.join(name)
    }

    pub fn partial(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".part");
        PathBuf::from(name)
    }

    pub fn voucher(&self) -> PathBuf {
        self.dir.join("voucher.json")
    }

    pub fn chapters(&self) -> PathBuf {
        self.dir.join("chapters.json")
    }

    pub fn cover(&self) -> PathBuf {
        self.dir.join("cover.jpg")
    }

    pub fn meta(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    /// Transcoded per-chapter outputs.
    pub fn output_dir(&self) -> PathBuf {
        self.dir.join("mp3")
    }

    pub fn archive(&self) -> PathBuf {
        self.dir.join("audiobook.zip")
    }

    pub fn create(&self) -> Result<(), StorageError> {
        for dir in [self.dir.clone(), self.output_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
