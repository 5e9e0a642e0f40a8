use crate::jobs::{Job, JobStore, Stage};

/// Receives progress for the job currently being worked on.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: u8, detail: &str);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _progress: u8, _detail: &str) {}
}

/// A slice of the 0..=100 progress range owned by one step of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

/// Source download, inside the download stage.
pub const DOWNLOAD_BAND: ProgressBand = ProgressBand::new(15, 45);

/// Chapter transcoding, inside the convert stage.
pub const TRANSCODE_BAND: ProgressBand = ProgressBand::new(50, 95);

impl ProgressBand {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    /// Linear position of `done / total` inside the band. An unknown or zero
    /// total reports the start of the band.
    pub fn scale(&self, done: u64, total: u64) -> u8 {
        if total == 0 {
            return self.start;
        }
        let span = u64::from(self.end.saturating_sub(self.start));
        let offset = span * done.min(total) / total;
        self.start + offset as u8
    }
}

/// Writes progress to the job store while the job is still in `stage`.
pub struct StoreProgress<'a> {
    store: &'a JobStore,
    job: &'a Job,
    stage: Stage,
}

impl<'a> StoreProgress<'a> {
    pub fn new(store: &'a JobStore, job: &'a Job, stage: Stage) -> Self {
        Self { store, job, stage }
    }
}

impl ProgressReporter for StoreProgress<'_> {
    fn report(&self, progress: u8, detail: &str) {
        match self.store.update_progress(self.job, self.stage, progress, detail) {
            Ok(true) => {}
            Ok(false) => log::debug!(
                "Job {} left {}; dropping progress update",
                self.job.id,
                self.stage
            ),
            Err(e) => log::warn!("Failed to record progress for job {}: {}", self.job.id, e),
        }
    }
}
