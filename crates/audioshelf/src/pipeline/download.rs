//! The download stage: claims `pending_download` jobs, fetches the source
//! and its side documents, and hands the job to the convert stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tracing::Instrument;

use super::error::PipelineError;
use super::polling::{run_polling_loop, PollTiming, WorkerHandle};
use super::progress::{ProgressReporter, StoreProgress, DOWNLOAD_BAND};
use crate::error::WorkerError;
use crate::jobs::{Job, JobStore, Stage, StoreError, User, CONVERT_ENTRY_PROGRESS};
use crate::provider::{
    resolve_download, CatalogItem, ContentProvider, DecryptionMode, Fetcher, LibraryCatalog,
};
use crate::sanitize::{redact_path, redact_url};
use crate::storage::handoff::write_json;
use crate::storage::{ArtifactLayout, HandoffMeta};

const MIB: u64 = 1024 * 1024;

pub struct DownloadWorker {
    store: JobStore,
    provider: Arc<dyn ContentProvider>,
    catalog: LibraryCatalog,
    fetcher: Fetcher,
    artifact_root: PathBuf,
}

impl DownloadWorker {
    pub fn new(
        store: JobStore,
        provider: Arc<dyn ContentProvider>,
        fetcher: Fetcher,
        artifact_root: impl Into<PathBuf>,
    ) -> Self {
        let catalog = LibraryCatalog::new(store.clone(), Arc::clone(&provider));
        Self {
            store,
            provider,
            catalog,
            fetcher,
            artifact_root: artifact_root.into(),
        }
    }

    /// Starts the polling loop on its own thread with a current-thread
    /// runtime for the network calls.
    pub fn spawn(self, timing: PollTiming) -> Result<WorkerHandle, WorkerError> {
        WorkerHandle::spawn("download", move |shutdown| {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("{}", WorkerError::Runtime(e));
                    return;
                }
            };
            run_polling_loop("download", timing, &shutdown, || {
                rt.block_on(self.process_next())
            });
        })
    }

    /// Claims and processes at most one job. Returns `Ok(false)` when the
    /// queue is empty. A job failure is recorded on the job, not returned.
    pub async fn process_next(&self) -> Result<bool, PipelineError> {
        let Some(job) = self.store.claim_next(Stage::PendingDownload)? else {
            return Ok(false);
        };

        let span = tracing::info_span!("download", job_id = job.id, content_id = %job.content_id);
        if let Err(e) = self.download(&job).instrument(span).await {
            error!("Download of job {} failed: {}", job.id, e);
            record_failure(&self.store, &job, &e)?;
        }
        Ok(true)
    }

    async fn download(&self, job: &Job) -> Result<(), PipelineError> {
        let user = self
            .store
            .user(job.user_id)?
            .ok_or(PipelineError::UserNotFound(job.user_id))?;
        let layout = ArtifactLayout::for_job(&self.artifact_root, job.id);
        layout.create()?;
        let progress = StoreProgress::new(&self.store, job, Stage::Downloading);

        progress.report(5, "Requesting license");
        let descriptor =
            resolve_download(self.provider.as_ref(), &user.credentials, &job.content_id).await?;
        let voucher_mode = descriptor.mode == DecryptionMode::Voucher;
        if let Some(voucher) = &descriptor.voucher {
            voucher.save(&layout.voucher())?;
        }
        info!(
            "Job {}: {} mode download from {}",
            job.id,
            descriptor.mode.as_str(),
            redact_url(&descriptor.url)
        );

        let audio = layout.audio(voucher_mode);
        self.fetch_source(&descriptor.url, &audio, &progress).await?;

        let item = self.catalog_item(&user, &job.content_id).await;
        self.fetch_chapters(&user, job, &layout).await;
        if let Some(cover_url) = item.as_ref().and_then(|i| i.cover_url.as_deref()) {
            self.fetch_cover(cover_url, &layout.cover()).await;
        }

        progress.report(DOWNLOAD_BAND.end + 2, "Writing metadata");
        let meta = HandoffMeta {
            content_id: job.content_id.clone(),
            title: job.title.clone(),
            authors: item.map(|i| i.authors.join(", ")).unwrap_or_default(),
            decryption_mode_is_voucher: voucher_mode,
            audio_file_path: audio,
            book_dir_path: layout.dir().to_path_buf(),
        };
        meta.save(&layout.meta())?;

        self.store
            .advance(job.id, Stage::PendingConvert, CONVERT_ENTRY_PROGRESS, None, None)?;
        Ok(())
    }

    /// Streams into `<audio>.part` and renames on completion; a finished file
    /// from an earlier attempt is reused.
    async fn fetch_source(
        &self,
        url: &str,
        audio: &Path,
        progress: &StoreProgress<'_>,
    ) -> Result<(), PipelineError> {
        if audio.is_file() {
            info!("Reusing downloaded source {}", redact_path(audio));
            progress.report(DOWNLOAD_BAND.end, "Source already downloaded");
            return Ok(());
        }

        let partial = ArtifactLayout::partial(audio);
        let mut last_written = None;
        let bytes = self
            .fetcher
            .fetch_to_file(url, &partial, |done, total| {
                let pct = total.map_or(DOWNLOAD_BAND.start, |t| DOWNLOAD_BAND.scale(done, t));
                // One store write per percent step or per MiB, whichever is sooner.
                let bucket = (pct, done / MIB);
                if last_written == Some(bucket) {
                    return;
                }
                last_written = Some(bucket);
                progress.report(pct, &size_detail(done, total));
            })
            .await?;

        std::fs::rename(&partial, audio).map_err(|e| crate::error::StorageError::MoveFile {
            from: partial.clone(),
            to: audio.to_path_buf(),
            source: e,
        })?;
        info!("Downloaded {} ({} bytes)", redact_path(audio), bytes);
        Ok(())
    }

    async fn catalog_item(&self, user: &User, content_id: &str) -> Option<CatalogItem> {
        match self.catalog.find(user, content_id).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                warn!("{} is not in the library of user {}", content_id, user.id);
                None
            }
            Err(e) => {
                warn!("Library lookup for {} failed: {}", content_id, e);
                None
            }
        }
    }

    async fn fetch_chapters(&self, user: &User, job: &Job, layout: &ArtifactLayout) {
        match self.provider.chapters(&user.credentials, &job.content_id).await {
            Ok(Some(doc)) => {
                if let Err(e) = write_json(&layout.chapters(), &doc) {
                    warn!("Could not save chapters for job {}: {}", job.id, e);
                }
            }
            Ok(None) => debug!("No chapter metadata for {}", job.content_id),
            Err(e) => warn!("Chapter metadata for {} unavailable: {}", job.content_id, e),
        }
    }

    async fn fetch_cover(&self, url: &str, cover: &Path) {
        if cover.is_file() {
            return;
        }
        let partial = ArtifactLayout::partial(cover);
        let result = match self.fetcher.fetch_to_file(url, &partial, |_, _| {}).await {
            Ok(_) => std::fs::rename(&partial, cover).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = result {
            warn!("Cover art download failed: {}", e);
        }
    }
}

fn size_detail(done: u64, total: Option<u64>) -> String {
    let mb = |bytes: u64| bytes as f64 / MIB as f64;
    match total {
        Some(total) => format!("{:.1} / {:.1} MB", mb(done), mb(total)),
        None => format!("{:.1} MB", mb(done)),
    }
}

/// Moves a job to `failed` with `error` as its message. A job that was deleted
/// or already moved on in the meantime is left alone.
pub(crate) fn record_failure(
    store: &JobStore,
    job: &Job,
    error: &PipelineError,
) -> Result<(), StoreError> {
    let progress = store.get(job.id)?.map_or(job.progress, |j| j.progress);
    match store.advance(job.id, Stage::Failed, progress, None, Some(&error.to_string())) {
        Ok(_) => Ok(()),
        Err(e @ (StoreError::NotFound(_) | StoreError::InvalidTransition { .. })) => {
            warn!("Could not mark job {} failed: {}", job.id, e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
