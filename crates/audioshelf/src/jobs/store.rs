//! Typed job store over the SQLite repositories.
//!
//! This is the single source of truth for the pipeline. Every method that
//! mutates a job issues exactly one atomic write (a single statement or one
//! transaction) and enforces the stage-machine rules before it does.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::db::book_repo::{self, BookRow, NewBook};
use crate::db::job_repo::{self, JobRow, NewJob, StageUpdate};
use crate::db::{library_cache_repo, user_repo, Database, DatabaseError};
use crate::provider::CredentialBundle;

use super::stage::{JobStatus, Stage};

/// Errors from job store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Job {0} not found")]
    NotFound(i64),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition { job_id: i64, from: Stage, to: Stage },

    #[error("Stage {0} is not a queue stage")]
    NotAQueue(Stage),

    #[error("Job {job_id} has a corrupt row: {reason}")]
    CorruptRow { job_id: i64, reason: String },
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    format_timestamp(Utc::now())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

// ─── Records ────────────────────────────────────────────────────────────────

/// A job as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    /// Stable id of the source item at the content provider.
    pub content_id: String,
    pub title: String,
    pub stage: Stage,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_detail: Option<String>,
    /// Present only when `stage` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    fn from_row(row: JobRow) -> Result<Self, StoreError> {
        let stage: Stage = row.stage.parse().map_err(|reason| StoreError::CorruptRow {
            job_id: row.id,
            reason,
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            content_id: row.content_id,
            title: row.title,
            stage,
            status: stage.status(),
            progress: row.progress.clamp(0, 100) as u8,
            progress_detail: row.progress_detail,
            error: row.error,
            created_at: parse_timestamp(&row.created_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
        })
    }
}

/// A completed job's durable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i64,
    pub user_id: i64,
    pub content_id: String,
    pub title: String,
    pub author: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            content_id: row.content_id,
            title: row.title,
            author: row.author,
            path: PathBuf::from(row.path),
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

/// What the convert stage knows about a finished book.
#[derive(Debug, Clone)]
pub struct BookRecord {
    pub content_id: String,
    pub title: String,
    pub author: String,
    pub path: PathBuf,
}

/// An account and its stored credential bundle.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub credentials: CredentialBundle,
}

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Persistent job store backed by rusqlite.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
    events: Option<Arc<JobProgressBroadcaster>>,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db, events: None }
    }

    /// Publishes a [`JobProgressEvent`] after every persisted job mutation.
    pub fn with_broadcaster(db: Database, events: Arc<JobProgressBroadcaster>) -> Self {
        Self {
            db,
            events: Some(events),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn publish(&self, job: &Job) {
        if let Some(events) = &self.events {
            events.send(JobProgressEvent::from_job(job));
        }
    }

    // ── Users ──

    /// Creates a user or replaces the credential bundle of an existing one.
    pub fn upsert_user(
        &self,
        name: &str,
        credentials: &CredentialBundle,
    ) -> Result<User, StoreError> {
        let json = serde_json::to_string(credentials.as_value()).map_err(|source| {
            DatabaseError::Json {
                column: "credentials",
                source,
            }
        })?;
        let row = user_repo::upsert(&self.db, name, &json, &now())?;
        Ok(User {
            id: row.id,
            name: row.name,
            credentials: credentials.clone(),
        })
    }

    pub fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let Some(row) = user_repo::find_by_id(&self.db, user_id)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&row.credentials).map_err(|source| {
            DatabaseError::Json {
                column: "credentials",
                source,
            }
        })?;
        Ok(Some(User {
            id: row.id,
            name: row.name,
            credentials: CredentialBundle::new(value),
        }))
    }

    // ── Jobs ──

    /// Creates a job in `PendingDownload` (the external submission path).
    pub fn submit(&self, user_id: i64, content_id: &str, title: &str) -> Result<Job, StoreError> {
        let stage = Stage::PendingDownload;
        let created_at = now();
        let row = job_repo::insert(
            &self.db,
            &NewJob {
                user_id,
                content_id,
                title,
                stage: stage.as_str(),
                status: stage.status().as_str(),
                created_at: &created_at,
            },
        )?;
        let job = Job::from_row(row)?;
        log::info!("Job {} submitted for {}", job.id, job.content_id);
        self.publish(&job);
        Ok(job)
    }

    /// Claims the oldest job waiting in `queue` and moves it into the queue's
    /// working stage in the same write.
    pub fn claim_next(&self, queue: Stage) -> Result<Option<Job>, StoreError> {
        let in_flight = queue.in_flight().ok_or(StoreError::NotAQueue(queue))?;
        let updated_at = now();
        let update = StageUpdate {
            stage: in_flight.as_str(),
            status: in_flight.status().as_str(),
            progress: i64::from(queue.entry_progress()),
            progress_detail: None,
            error: None,
            updated_at: &updated_at,
            completed_at: None,
        };

        let Some(row) = job_repo::claim_next(&self.db, queue.as_str(), &update)? else {
            return Ok(None);
        };
        let job = Job::from_row(row)?;
        log::info!("Job {} claimed: {} -> {}", job.id, queue, in_flight);
        self.publish(&job);
        Ok(Some(job))
    }

    /// Moves a job to `new_stage`, enforcing the stage machine.
    ///
    /// `Completed` forces progress 100 and clears the detail. `Failed`
    /// records the error text (never empty) and clears the detail. Every
    /// other stage clears the error.
    pub fn advance(
        &self,
        job_id: i64,
        new_stage: Stage,
        progress: u8,
        detail: Option<&str>,
        error: Option<&str>,
    ) -> Result<Job, StoreError> {
        let updated_at = now();
        let (progress, detail, error) = normalize(new_stage, progress, detail, error);
        let update = StageUpdate {
            stage: new_stage.as_str(),
            status: new_stage.status().as_str(),
            progress: i64::from(progress),
            progress_detail: detail,
            error: error.as_deref(),
            updated_at: &updated_at,
            completed_at: new_stage.is_terminal().then_some(updated_at.as_str()),
        };

        let allowed = stage_names(&Stage::predecessors(new_stage));
        match job_repo::transition(&self.db, job_id, &allowed, &update)? {
            Some(row) => {
                let job = Job::from_row(row)?;
                log::info!("Job {} advanced to {} ({}%)", job.id, job.stage, job.progress);
                self.publish(&job);
                Ok(job)
            }
            None => Err(self.explain_rejected(job_id, new_stage)),
        }
    }

    /// Advances a converting job to `Completed` and upserts its book in one
    /// transaction.
    pub fn complete(&self, job_id: i64, book: &BookRecord) -> Result<(Job, Book), StoreError> {
        let updated_at = now();
        let path = book.path.to_string_lossy();
        let update = StageUpdate {
            stage: Stage::Completed.as_str(),
            status: JobStatus::Completed.as_str(),
            progress: 100,
            progress_detail: None,
            error: None,
            updated_at: &updated_at,
            completed_at: Some(&updated_at),
        };

        let job_row = job_repo::find_by_id(&self.db, job_id)?.ok_or(StoreError::NotFound(job_id))?;
        let new_book = NewBook {
            user_id: job_row.user_id,
            content_id: &book.content_id,
            title: &book.title,
            author: &book.author,
            path: &path,
            created_at: &updated_at,
        };

        let allowed = stage_names(&Stage::predecessors(Stage::Completed));
        match job_repo::complete_with_book(&self.db, job_id, &allowed, &update, &new_book)? {
            Some((job_row, book_row)) => {
                let job = Job::from_row(job_row)?;
                log::info!("Job {} completed; book stored at {}", job.id, path);
                self.publish(&job);
                Ok((job, Book::from(book_row)))
            }
            None => Err(self.explain_rejected(job_id, Stage::Completed)),
        }
    }

    /// Writes progress for a job still in `stage`. Returns false (and writes
    /// nothing) once the job has left that stage or been deleted.
    pub fn update_progress(
        &self,
        job: &Job,
        stage: Stage,
        progress: u8,
        detail: &str,
    ) -> Result<bool, StoreError> {
        let progress = progress.min(100);
        let written = job_repo::update_progress(
            &self.db,
            job.id,
            stage.as_str(),
            i64::from(progress),
            Some(detail),
            &now(),
        )?;
        if written {
            if let Some(events) = &self.events {
                events.send(JobProgressEvent::progress(
                    job.id,
                    job.user_id,
                    &job.content_id,
                    stage,
                    progress,
                    detail,
                ));
            }
        }
        Ok(written)
    }

    /// Rolls every job in a working stage back to the queue it was claimed
    /// from, resetting progress to that queue's entry value.
    pub fn requeue_interrupted(&self, working: Stage) -> Result<Vec<Job>, StoreError> {
        let target = working
            .rollback_target()
            .ok_or(StoreError::NotAQueue(working))?;
        let updated_at = now();
        let update = StageUpdate {
            stage: target.as_str(),
            status: target.status().as_str(),
            progress: i64::from(target.entry_progress()),
            progress_detail: None,
            error: None,
            updated_at: &updated_at,
            completed_at: None,
        };

        let jobs = job_repo::requeue_stage(&self.db, working.as_str(), &update)?
            .into_iter()
            .map(Job::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        for job in &jobs {
            self.publish(job);
        }
        Ok(jobs)
    }

    pub fn get(&self, job_id: i64) -> Result<Option<Job>, StoreError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(Job::from_row)
            .transpose()
    }

    /// A user's jobs, newest first.
    pub fn list_by_user(&self, user_id: i64) -> Result<Vec<Job>, StoreError> {
        job_repo::list_by_user(&self.db, user_id)?
            .into_iter()
            .map(Job::from_row)
            .collect()
    }

    /// Jobs in `stage`, oldest first.
    pub fn list_by_stage(&self, stage: Stage) -> Result<Vec<Job>, StoreError> {
        job_repo::list_by_stage(&self.db, stage.as_str())?
            .into_iter()
            .map(Job::from_row)
            .collect()
    }

    /// Ids of every job that has not produced a book yet.
    pub fn unfinished_job_ids(&self) -> Result<Vec<i64>, StoreError> {
        Ok(job_repo::ids_excluding_stage(
            &self.db,
            Stage::Completed.as_str(),
        )?)
    }

    /// Deletes a job owned by `user_id` (administrative action).
    pub fn delete(&self, job_id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(job_repo::delete(&self.db, job_id, user_id)?)
    }

    fn explain_rejected(&self, job_id: i64, to: Stage) -> StoreError {
        match self.get(job_id) {
            Ok(Some(job)) => StoreError::InvalidTransition {
                job_id,
                from: job.stage,
                to,
            },
            Ok(None) => StoreError::NotFound(job_id),
            Err(e) => e,
        }
    }

    // ── Books ──

    pub fn book(&self, user_id: i64, content_id: &str) -> Result<Option<Book>, StoreError> {
        Ok(book_repo::find(&self.db, user_id, content_id)?.map(Book::from))
    }

    pub fn books_for_user(&self, user_id: i64) -> Result<Vec<Book>, StoreError> {
        Ok(book_repo::list_by_user(&self.db, user_id)?
            .into_iter()
            .map(Book::from)
            .collect())
    }

    pub fn book_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        Ok(book_repo::all_paths(&self.db)?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    /// Deletes a user's book record and returns its artifact directory.
    pub fn delete_book(&self, book_id: i64, user_id: i64) -> Result<Option<PathBuf>, StoreError> {
        Ok(book_repo::delete(&self.db, book_id, user_id)?.map(PathBuf::from))
    }

    // ── Library snapshot cache ──

    pub fn library_cache(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(library_cache_repo::get(&self.db, user_id)?)
    }

    pub fn save_library_cache(&self, user_id: i64, library_json: &str) -> Result<(), StoreError> {
        Ok(library_cache_repo::save(
            &self.db,
            user_id,
            library_json,
            &now(),
        )?)
    }
}

fn stage_names(stages: &[Stage]) -> Vec<&'static str> {
    stages.iter().map(Stage::as_str).collect()
}

fn normalize<'a>(
    stage: Stage,
    progress: u8,
    detail: Option<&'a str>,
    error: Option<&str>,
) -> (u8, Option<&'a str>, Option<String>) {
    match stage {
        Stage::Completed => (100, None, None),
        Stage::Failed => {
            let error = error
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .unwrap_or("unknown error");
            (progress.min(100), None, Some(error.to_string()))
        }
        _ => (progress.min(100), detail, None),
    }
}
