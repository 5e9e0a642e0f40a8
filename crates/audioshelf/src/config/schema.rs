use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chapters::DEFAULT_INTRO_THRESHOLD_MS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Parent of every job's artifact directory.
    pub artifact_root: PathBuf,
    /// Defaults to `~/.audioshelf/data/audioshelf.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_error_backoff_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl WorkersConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Chapter conversions run at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_bitrate")]
    pub default_bitrate: String,
    #[serde(default = "default_intro_threshold_ms")]
    pub intro_threshold_ms: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_parallelism() -> usize {
    match num_cpus::get() {
        0 => 4,
        n => n,
    }
}

fn default_bitrate() -> String {
    "128k".to_string()
}

fn default_intro_threshold_ms() -> u64 {
    DEFAULT_INTRO_THRESHOLD_MS
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            parallelism: default_parallelism(),
            default_bitrate: default_bitrate(),
            intro_threshold_ms: default_intro_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub gateway_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
