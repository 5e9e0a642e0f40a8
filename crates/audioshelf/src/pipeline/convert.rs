//! The convert stage: claims `pending_convert` jobs, transcodes every chapter,
//! packages the result and completes the job with its book record.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use secrecy::SecretString;

use super::download::record_failure;
use super::error::PipelineError;
use super::polling::{run_polling_loop, PollTiming, WorkerHandle};
use super::progress::{ProgressReporter, StoreProgress, TRANSCODE_BAND};
use crate::chapters::{self, ChapterDocument, ChapterSegment};
use crate::error::{StorageError, WorkerError};
use crate::jobs::{Book, BookRecord, Job, JobStore, Stage};
use crate::provider::CredentialResolver;
use crate::storage::handoff::read_json;
use crate::storage::{package, ArtifactLayout, HandoffMeta, VoucherDocument};
use crate::transcode::{Decryption, StageInput, TranscodeStage};

pub struct ConvertWorker {
    store: JobStore,
    resolver: Arc<dyn CredentialResolver>,
    transcode: TranscodeStage,
    artifact_root: PathBuf,
    intro_threshold_ms: u64,
}

impl ConvertWorker {
    pub fn new(
        store: JobStore,
        resolver: Arc<dyn CredentialResolver>,
        transcode: TranscodeStage,
        artifact_root: impl Into<PathBuf>,
        intro_threshold_ms: u64,
    ) -> Self {
        Self {
            store,
            resolver,
            transcode,
            artifact_root: artifact_root.into(),
            intro_threshold_ms,
        }
    }

    pub fn spawn(self, timing: PollTiming) -> Result<WorkerHandle, WorkerError> {
        WorkerHandle::spawn("convert", move |shutdown| {
            run_polling_loop("convert", timing, &shutdown, || self.process_next())
        })
    }

    /// Claims and processes at most one job. Returns `Ok(false)` when the
    /// queue is empty. A job failure is recorded on the job, not returned.
    pub fn process_next(&self) -> Result<bool, PipelineError> {
        let Some(job) = self.store.claim_next(Stage::PendingConvert)? else {
            return Ok(false);
        };

        let span = tracing::info_span!("convert", job_id = job.id, content_id = %job.content_id);
        let _enter = span.enter();
        match self.convert(&job) {
            Ok(book) => info!("Job {} produced book {} ({})", job.id, book.id, book.title),
            Err(e) => {
                error!("Conversion of job {} failed: {}", job.id, e);
                record_failure(&self.store, &job, &e)?;
            }
        }
        Ok(true)
    }

    fn convert(&self, job: &Job) -> Result<Book, PipelineError> {
        let layout = ArtifactLayout::for_job(&self.artifact_root, job.id);
        let meta = HandoffMeta::load(&layout.meta())?;
        let decryption = self.resolve_decryption(job, &meta, &layout)?;
        let segments = self.load_segments(&layout);
        layout.create()?;

        let progress = StoreProgress::new(&self.store, job, Stage::Converting);
        let outcome = self.transcode.run(
            &StageInput {
                source: &meta.audio_file_path,
                decryption: &decryption,
                segments: &segments,
                output_dir: &layout.output_dir(),
                title: &meta.title,
            },
            TRANSCODE_BAND,
            &progress,
        )?;
        info!(
            "Job {}: {} output(s), {} transcoded, {} reused",
            job.id,
            outcome.outputs.len(),
            outcome.transcoded,
            outcome.skipped
        );

        progress.report(TRANSCODE_BAND.end, "Packaging");
        package(&outcome.outputs, Some(&layout.cover()), &layout.archive())?;

        let (_, book) = self.store.complete(
            job.id,
            &BookRecord {
                content_id: meta.content_id,
                title: meta.title,
                author: meta.authors,
                path: meta.book_dir_path,
            },
        )?;
        Ok(book)
    }

    fn resolve_decryption(
        &self,
        job: &Job,
        meta: &HandoffMeta,
        layout: &ArtifactLayout,
    ) -> Result<Decryption, PipelineError> {
        if meta.decryption_mode_is_voucher {
            let path = layout.voucher();
            let voucher = VoucherDocument::load(&path)?;
            if !voucher.is_complete() {
                return Err(PipelineError::IncompleteVoucher(path));
            }
            return Ok(Decryption::Voucher {
                key: SecretString::from(voucher.key),
                iv: SecretString::from(voucher.iv),
            });
        }

        let user = self
            .store
            .user(job.user_id)?
            .ok_or(PipelineError::UserNotFound(job.user_id))?;
        Ok(Decryption::Legacy {
            activation_token: self.resolver.activation_token(&user.credentials)?,
        })
    }

    /// Chapter metadata is best-effort: without it the whole file becomes
    /// one output.
    fn load_segments(&self, layout: &ArtifactLayout) -> Vec<ChapterSegment> {
        match read_json::<ChapterDocument>(&layout.chapters(), "chapter document") {
            Ok(doc) => chapters::flatten(&doc.chapters, self.intro_threshold_ms),
            Err(StorageError::Missing { .. }) => Vec::new(),
            Err(e) => {
                warn!("Ignoring chapter metadata: {}", e);
                Vec::new()
            }
        }
    }
}
