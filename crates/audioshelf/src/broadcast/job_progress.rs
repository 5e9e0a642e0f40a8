//! Job progress broadcaster for real-time job status streaming.
//!
//! The job store publishes one event after every persisted mutation, so a
//! subscriber sees the same sequence of states the database went through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::{Job, JobStatus, Stage};

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: i64,
    pub user_id: i64,
    pub content_id: String,
    pub stage: Stage,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Snapshot of a job as it was just written.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id,
            content_id: job.content_id.clone(),
            stage: job.stage,
            status: job.status,
            progress: job.progress,
            progress_detail: job.progress_detail.clone(),
            error: job.error.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Progress-only event for a job still in `stage`.
    pub fn progress(
        job_id: i64,
        user_id: i64,
        content_id: &str,
        stage: Stage,
        progress: u8,
        detail: &str,
    ) -> Self {
        Self {
            job_id,
            user_id,
            content_id: content_id.to_string(),
            stage,
            status: stage.status(),
            progress,
            progress_detail: Some(detail.to_string()),
            error: None,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::progress(
            1,
            1,
            "X1",
            Stage::Downloading,
            20,
            "1.0 / 2.0 MB",
        ));
    }

    #[test]
    fn test_subscriber_receives_event() {
        let broadcaster = JobProgressBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        broadcaster.send(JobProgressEvent::progress(
            7,
            1,
            "X1",
            Stage::Converting,
            72,
            "Chapter 4 / 10",
        ));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.job_id, 7);
        assert_eq!(event.status, JobStatus::Running);
        assert_eq!(event.progress_detail.as_deref(), Some("Chapter 4 / 10"));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::progress(1, 2, "X1", Stage::Downloading, 15, "d");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], 1);
        assert_eq!(json["stage"], "downloading");
        assert!(json.get("error").is_none());
    }
}
