//! Startup reconciliation between the job store and the artifact root.
//!
//! Must run to completion before either worker starts polling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, StorageError};
use crate::jobs::{JobStore, Stage};
use crate::storage::ArtifactLayout;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs moved from `downloading` back to `pending_download`.
    pub requeued_downloads: Vec<i64>,
    /// Jobs moved from `converting` back to `pending_convert`.
    pub requeued_conversions: Vec<i64>,
    /// Artifact directories deleted as orphans.
    pub removed_dirs: Vec<PathBuf>,
}

pub struct RecoveryManager {
    store: JobStore,
    artifact_root: PathBuf,
}

impl RecoveryManager {
    pub fn new(store: JobStore, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            artifact_root: artifact_root.into(),
        }
    }

    /// Rolls interrupted jobs back to their queues, then sweeps orphaned
    /// artifact directories. The sweep reads the store only after the
    /// rollback has committed.
    pub fn run(&self) -> Result<RecoveryReport> {
        let _span = tracing::info_span!("recovery").entered();

        let requeued_downloads = self.requeue(Stage::Downloading)?;
        let requeued_conversions = self.requeue(Stage::Converting)?;
        let removed_dirs = self.sweep()?;

        info!(
            "Recovery complete: {} download(s) and {} conversion(s) requeued, {} orphan dir(s) removed",
            requeued_downloads.len(),
            requeued_conversions.len(),
            removed_dirs.len()
        );
        Ok(RecoveryReport {
            requeued_downloads,
            requeued_conversions,
            removed_dirs,
        })
    }

    fn requeue(&self, working: Stage) -> Result<Vec<i64>> {
        let jobs = self.store.requeue_interrupted(working)?;
        for job in &jobs {
            info!("Job {} was interrupted in {}, requeued to {}", job.id, working, job.stage);
        }
        Ok(jobs.into_iter().map(|j| j.id).collect())
    }

    /// Deletes every directory directly under the artifact root that is
    /// neither a book's path nor the directory of a job without a book.
    fn sweep(&self) -> Result<Vec<PathBuf>> {
        if !self.artifact_root.is_dir() {
            debug!("Artifact root {} does not exist yet", self.artifact_root.display());
            return Ok(Vec::new());
        }

        let mut book_paths: HashSet<PathBuf> = HashSet::new();
        for path in self.store.book_paths()? {
            if let Ok(canonical) = path.canonicalize() {
                book_paths.insert(canonical);
            }
            book_paths.insert(path);
        }
        let live_jobs: HashSet<i64> = self.store.unfinished_job_ids()?.into_iter().collect();

        let mut removed = Vec::new();
        for entry in WalkDir::new(&self.artifact_root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::Scan {
                path: self.artifact_root.clone(),
                source: e,
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();
            if is_protected(dir, &book_paths, &live_jobs) {
                continue;
            }

            warn!("Removing orphaned artifact directory {}", dir.display());
            std::fs::remove_dir_all(dir).map_err(|e| StorageError::Remove {
                path: dir.to_path_buf(),
                source: e,
            })?;
            removed.push(dir.to_path_buf());
        }
        Ok(removed)
    }
}

fn is_protected(dir: &Path, book_paths: &HashSet<PathBuf>, live_jobs: &HashSet<i64>) -> bool {
    if book_paths.contains(dir) {
        return true;
    }
    if dir.canonicalize().is_ok_and(|c| book_paths.contains(&c)) {
        return true;
    }
    dir.file_name()
        .and_then(|n| n.to_str())
        .and_then(ArtifactLayout::job_id_from_dir_name)
        .is_some_and(|id| live_jobs.contains(&id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::jobs::BookRecord;
    use crate::provider::CredentialBundle;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn store_with_user() -> (JobStore, i64) {
        let store = JobStore::new(Database::open_in_memory().unwrap());
        let user = store
            .upsert_user("reader", &CredentialBundle::new(serde_json::json!({})))
            .unwrap();
        (store, user.id)
    }

    fn complete_job(store: &JobStore, user_id: i64, content_id: &str, path: &Path) -> i64 {
        let job = store.submit(user_id, content_id, content_id).unwrap();
        store.claim_next(Stage::PendingDownload).unwrap();
        store
            .advance(job.id, Stage::PendingConvert, 50, None, None)
            .unwrap();
        store.claim_next(Stage::PendingConvert).unwrap();
        store
            .complete(
                job.id,
                &BookRecord {
                    content_id: content_id.to_string(),
                    title: content_id.to_string(),
                    author: String::new(),
                    path: path.to_path_buf(),
                },
            )
            .unwrap();
        job.id
    }

    #[test]
    fn test_rollback_restores_queue_stages() {
        let tmp = TempDir::new().unwrap();
        let (store, user_id) = store_with_user();
        let downloading = store.submit(user_id, "A", "A").unwrap();
        let converting = store.submit(user_id, "B", "B").unwrap();
        store.claim_next(Stage::PendingDownload).unwrap();
        store.claim_next(Stage::PendingDownload).unwrap();
        store
            .advance(converting.id, Stage::PendingConvert, 50, None, None)
            .unwrap();
        let claimed = store.claim_next(Stage::PendingConvert).unwrap().unwrap();
        store
            .update_progress(&claimed, Stage::Converting, 77, "Chapter 5 / 9")
            .unwrap();

        let report = RecoveryManager::new(store.clone(), tmp.path()).run().unwrap();

        assert_eq!(report.requeued_downloads, vec![downloading.id]);
        assert_eq!(report.requeued_conversions, vec![converting.id]);
        let a = store.get(downloading.id).unwrap().unwrap();
        assert_eq!((a.stage, a.progress), (Stage::PendingDownload, 0));
        let b = store.get(converting.id).unwrap().unwrap();
        assert_eq!((b.stage, b.progress), (Stage::PendingConvert, 50));
        assert!(b.progress_detail.is_none());
    }

    #[test]
    fn test_sweep_keeps_books_and_removes_orphans() {
        let tmp = TempDir::new().unwrap();
        let (store, user_id) = store_with_user();
        let book_dir = tmp.child("A");
        book_dir.child("audiobook.zip").write_binary(b"zip").unwrap();
        tmp.child("B").child("audio.aax").write_binary(b"junk").unwrap();
        tmp.child("notes.txt").write_str("keep me").unwrap();
        complete_job(&store, user_id, "X1", book_dir.path());

        let report = RecoveryManager::new(store, tmp.path()).run().unwrap();

        assert!(book_dir.path().is_dir());
        assert!(!tmp.child("B").path().exists());
        assert!(tmp.child("notes.txt").path().exists());
        assert_eq!(report.removed_dirs, vec![tmp.child("B").path().to_path_buf()]);
    }

    #[test]
    fn test_sweep_protects_unfinished_jobs() {
        let tmp = TempDir::new().unwrap();
        let (store, user_id) = store_with_user();
        let interrupted = store.submit(user_id, "A", "A").unwrap();
        store.claim_next(Stage::PendingDownload).unwrap();
        let failed = store.submit(user_id, "B", "B").unwrap();
        store
            .advance(failed.id, Stage::Failed, 0, None, Some("boom"))
            .unwrap();

        let interrupted_dir = tmp.child(ArtifactLayout::dir_name(interrupted.id));
        interrupted_dir.child("audio.aaxc.part").write_binary(b"half").unwrap();
        let failed_dir = tmp.child(ArtifactLayout::dir_name(failed.id));
        failed_dir.create_dir_all().unwrap();
        let stale_dir = tmp.child(ArtifactLayout::dir_name(9999));
        stale_dir.create_dir_all().unwrap();

        RecoveryManager::new(store.clone(), tmp.path()).run().unwrap();

        assert!(interrupted_dir.child("audio.aaxc.part").path().exists());
        assert!(failed_dir.path().is_dir());
        assert!(!stale_dir.path().exists());
        assert_eq!(
            store.get(interrupted.id).unwrap().unwrap().stage,
            Stage::PendingDownload
        );
    }

    #[test]
    fn test_missing_artifact_root_is_not_an_error() {
        let (store, _) = store_with_user();
        let report = RecoveryManager::new(store, "/nonexistent/audioshelf/books")
            .run()
            .unwrap();
        assert!(report.removed_dirs.is_empty());
    }
}
