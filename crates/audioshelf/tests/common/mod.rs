//! Fakes for the provider and transcoder seams, and a wired-up pipeline.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use audioshelf::chapters::{ChapterDocument, ChapterNode};
use audioshelf::jobs::User;
use audioshelf::pipeline::{ConvertWorker, DownloadWorker};
use audioshelf::provider::{
    BundleCredentialResolver, CatalogItem, ContentProvider, CredentialBundle, DecryptionMode,
    DownloadDescriptor, Fetcher, ProviderError,
};
use audioshelf::storage::VoucherDocument;
use audioshelf::transcode::{
    Decryption, ProbeInfo, TranscodeError, TranscodeRequest, TranscodeStage, Transcoder,
};
use audioshelf::{Database, JobStore};

pub const CONTENT_ID: &str = "X1";

/// Serves `file://` URLs out of a temp directory.
pub struct FakeProvider {
    pub source_url: String,
    pub cover_url: String,
    pub voucher_available: bool,
    pub legacy_available: bool,
    pub chapters: Option<ChapterDocument>,
    /// `chapters()` errors instead of answering.
    pub chapters_fail: bool,
}

impl FakeProvider {
    pub fn new(mirror: &Path) -> Self {
        let source = mirror.join("source.aaxc");
        std::fs::write(&source, vec![0xAAu8; 64 * 1024]).unwrap();
        let cover = mirror.join("cover-src.jpg");
        std::fs::write(&cover, b"\xFF\xD8\xFFjpeg").unwrap();

        Self {
            source_url: reqwest::Url::from_file_path(&source).unwrap().to_string(),
            cover_url: reqwest::Url::from_file_path(&cover).unwrap().to_string(),
            voucher_available: true,
            legacy_available: true,
            chapters: Some(three_chapters()),
            chapters_fail: false,
        }
    }
}

pub fn three_chapters() -> ChapterDocument {
    ChapterDocument {
        chapters: vec![
            ChapterNode::leaf("Opening Credits", 0, 20_000),
            ChapterNode::leaf("Chapter 1", 20_000, 600_000),
            ChapterNode::leaf("Chapter 2", 620_000, 580_000),
        ],
        runtime_length_ms: Some(1_200_000),
    }
}

#[async_trait]
impl ContentProvider for FakeProvider {
    async fn library(&self, _: &CredentialBundle) -> Result<Vec<CatalogItem>, ProviderError> {
        Ok(vec![CatalogItem {
            content_id: CONTENT_ID.to_string(),
            title: "The Test Book".to_string(),
            authors: vec!["Ann Author".to_string(), "Bob Writer".to_string()],
            duration_secs: Some(1200),
            cover_url: Some(self.cover_url.clone()),
        }])
    }

    async fn voucher_license(
        &self,
        _: &CredentialBundle,
        _: &str,
    ) -> Result<DownloadDescriptor, ProviderError> {
        if !self.voucher_available {
            return Err(ProviderError::MissingField("key"));
        }
        Ok(DownloadDescriptor {
            url: self.source_url.clone(),
            mode: DecryptionMode::Voucher,
            voucher: Some(VoucherDocument {
                key: "00112233445566778899aabbccddeeff".to_string(),
                iv: "ffeeddccbbaa99887766554433221100".to_string(),
            }),
        })
    }

    async fn legacy_license(
        &self,
        _: &CredentialBundle,
        _: &str,
    ) -> Result<DownloadDescriptor, ProviderError> {
        if !self.legacy_available {
            return Err(ProviderError::Status {
                endpoint: format!("items/{}/license", CONTENT_ID),
                status: reqwest::StatusCode::FORBIDDEN,
            });
        }
        Ok(DownloadDescriptor {
            url: self.source_url.clone(),
            mode: DecryptionMode::Legacy,
            voucher: None,
        })
    }

    async fn chapters(
        &self,
        _: &CredentialBundle,
        _: &str,
    ) -> Result<Option<ChapterDocument>, ProviderError> {
        if self.chapters_fail {
            return Err(ProviderError::MissingField("chapters"));
        }
        Ok(self.chapters.clone())
    }
}

/// Writes a small fake mp3 per request and counts invocations.
#[derive(Default)]
pub struct CountingTranscoder {
    pub invocations: AtomicUsize,
    pub outputs: Mutex<Vec<PathBuf>>,
}

impl CountingTranscoder {
    pub fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Transcoder for CountingTranscoder {
    fn probe(&self, _: &Path, _: &Decryption) -> Result<ProbeInfo, TranscodeError> {
        Ok(ProbeInfo {
            bitrate: "64k".to_string(),
            artist: "Ann Author".to_string(),
            album: "The Test Book".to_string(),
        })
    }

    fn transcode(&self, request: &TranscodeRequest<'_>) -> Result<(), TranscodeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.outputs.lock().unwrap().push(request.output.to_path_buf());
        std::fs::write(request.output, format!("ID3 {}", request.tags.title)).map_err(|e| {
            TranscodeError::Io {
                path: request.output.to_path_buf(),
                source: e,
            }
        })
    }
}

/// A store, artifact root, and both workers wired to the fakes.
pub struct Harness {
    pub tmp: TempDir,
    pub store: JobStore,
    pub user: User,
    pub transcoder: Arc<CountingTranscoder>,
    pub download: DownloadWorker,
    pub convert: ConvertWorker,
}

impl Harness {
    pub fn new(provider: impl FnOnce(&Path) -> FakeProvider, credentials: serde_json::Value) -> Self {
        let tmp = TempDir::new().unwrap();
        let mirror = tmp.path().join("mirror");
        std::fs::create_dir_all(&mirror).unwrap();

        let store = JobStore::new(Database::open_in_memory().unwrap());
        let user = store
            .upsert_user("reader", &CredentialBundle::new(credentials))
            .unwrap();
        let transcoder = Arc::new(CountingTranscoder::default());

        let provider: Arc<dyn ContentProvider> = Arc::new(provider(&mirror));
        let download = DownloadWorker::new(
            store.clone(),
            provider,
            Fetcher::new().unwrap(),
            tmp.path().join("books"),
        );
        let convert = ConvertWorker::new(
            store.clone(),
            Arc::new(BundleCredentialResolver),
            TranscodeStage::new(transcoder.clone(), 2, "128k"),
            tmp.path().join("books"),
            100,
        );

        Self {
            tmp,
            store,
            user,
            transcoder,
            download,
            convert,
        }
    }

    pub fn artifact_root(&self) -> PathBuf {
        self.tmp.path().join("books")
    }
}
