//! The polling discipline shared by both stage workers, and the handle that
//! owns a worker thread's lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::WorkersConfig;
use crate::error::WorkerError;

/// Granularity of every sleep, so a stop request is noticed quickly.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Sleep when the stage queue is empty.
    pub idle: Duration,
    /// Sleep after a loop-level error.
    pub backoff: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(2),
            backoff: Duration::from_secs(5),
        }
    }
}

impl From<&WorkersConfig> for PollTiming {
    fn from(config: &WorkersConfig) -> Self {
        Self {
            idle: config.poll_interval(),
            backoff: config.error_backoff(),
        }
    }
}

/// Runs `step` until `shutdown` is set.
///
/// `step` returns `Ok(true)` when it handled a job (poll again right away),
/// `Ok(false)` when the queue was empty. An `Err` is a loop-level failure: it
/// is logged and the loop backs off, it never exits.
pub fn run_polling_loop<F, E>(name: &str, timing: PollTiming, shutdown: &AtomicBool, mut step: F)
where
    F: FnMut() -> Result<bool, E>,
    E: std::fmt::Display,
{
    info!("{} worker started", name);
    while !shutdown.load(Ordering::Acquire) {
        match step() {
            Ok(true) => {}
            Ok(false) => sleep_unless_shutdown(timing.idle, shutdown),
            Err(e) => {
                error!("{} worker loop error: {}", name, e);
                sleep_unless_shutdown(timing.backoff, shutdown);
            }
        }
    }
    info!("{} worker stopped", name);
}

fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SHUTDOWN_CHECK.min(deadline - now));
    }
}

/// Owns one worker thread. Dropping the handle signals the worker to stop
/// but does not wait for it.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns `body` on a named thread. `body` receives the stop flag and
    /// must return once it is set.
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self, WorkerError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name(format!("{}-worker", name))
            .spawn(move || body(flag))
            .map_err(|e| WorkerError::SpawnFailed(format!("{}: {}", name, e)))?;

        Ok(Self {
            name,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the worker and waits up to `timeout` for it to finish. An
    /// in-flight download or transcode is not interrupted; if it outlasts the
    /// timeout the thread is left to finish on its own.
    pub fn stop(&mut self, timeout: Duration) -> Result<(), WorkerError> {
        self.shutdown.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!("{} worker still busy after {:?}, detaching", self.name, timeout);
                return Err(WorkerError::StopTimeout {
                    name: self.name,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_millis(20));
        }

        if let Err(e) = thread.join() {
            error!("{} worker panicked: {:?}", self.name, e);
        } else {
            debug!("{} worker joined", self.name);
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
