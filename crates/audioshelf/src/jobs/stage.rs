//! The job stage state machine.
//!
//! ```text
//! PENDING_DOWNLOAD -> DOWNLOADING -> PENDING_CONVERT -> CONVERTING -> COMPLETED
//!        \________________\_______________\________________\______-> FAILED
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Progress a job carries when it is queued for download.
pub const DOWNLOAD_ENTRY_PROGRESS: u8 = 0;

/// Progress a job carries when it is handed from download to convert.
pub const CONVERT_ENTRY_PROGRESS: u8 = 50;

/// One discrete step of a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PendingDownload,
    Downloading,
    PendingConvert,
    Converting,
    Completed,
    Failed,
}

/// Coarse job status, a pure function of [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::PendingDownload,
        Stage::Downloading,
        Stage::PendingConvert,
        Stage::Converting,
        Stage::Completed,
        Stage::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PendingDownload => "pending_download",
            Stage::Downloading => "downloading",
            Stage::PendingConvert => "pending_convert",
            Stage::Converting => "converting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Stage::PendingDownload | Stage::PendingConvert => JobStatus::Pending,
            Stage::Downloading | Stage::Converting => JobStatus::Running,
            Stage::Completed => JobStatus::Completed,
            Stage::Failed => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// The working stage a worker moves a job into when it claims it from
    /// this queue stage.
    pub fn in_flight(&self) -> Option<Stage> {
        match self {
            Stage::PendingDownload => Some(Stage::Downloading),
            Stage::PendingConvert => Some(Stage::Converting),
            _ => None,
        }
    }

    /// The queue stage an interrupted working stage is rolled back to after
    /// a crash.
    pub fn rollback_target(&self) -> Option<Stage> {
        match self {
            Stage::Downloading => Some(Stage::PendingDownload),
            Stage::Converting => Some(Stage::PendingConvert),
            _ => None,
        }
    }

    /// Progress a job is reset to when it (re-)enters this queue stage.
    pub fn entry_progress(&self) -> u8 {
        match self {
            Stage::PendingConvert | Stage::Converting => CONVERT_ENTRY_PROGRESS,
            Stage::Completed => 100,
            _ => DOWNLOAD_ENTRY_PROGRESS,
        }
    }

    /// Whether a forward transition `self -> next` is legal. Stages are never
    /// skipped; every non-terminal stage may fail.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        match (self, next) {
            (from, Stage::Failed) => !from.is_terminal(),
            (Stage::PendingDownload, Stage::Downloading)
            | (Stage::Downloading, Stage::PendingConvert)
            | (Stage::PendingConvert, Stage::Converting)
            | (Stage::Converting, Stage::Completed) => true,
            _ => false,
        }
    }

    /// All stages from which `next` may be entered.
    pub fn predecessors(next: Stage) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|from| from.can_advance_to(next))
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
