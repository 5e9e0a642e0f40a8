//! Decrypt-and-transcode: the external tool seam and the per-chapter stage
//! runner built on it.

pub mod error;
pub mod ffmpeg;
pub mod runner;

use std::path::Path;

use secrecy::SecretString;

pub use error::TranscodeError;
pub use ffmpeg::FfmpegTranscoder;
pub use runner::{StageInput, StageOutcome, TranscodeStage, WHOLE_FILE_NAME};

/// Decryption parameters for one job, resolved once before any chapter runs.
#[derive(Debug)]
pub enum Decryption {
    Voucher { key: SecretString, iv: SecretString },
    Legacy { activation_token: SecretString },
}

/// What a probe of the source reports. Empty strings when a tag is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// ffmpeg bitrate notation, e.g. `"64k"`.
    pub bitrate: String,
    pub artist: String,
    pub album: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// `i/N`.
    pub track: String,
}

/// One output file.
#[derive(Debug)]
pub struct TranscodeRequest<'a> {
    pub source: &'a Path,
    pub decryption: &'a Decryption,
    pub output: &'a Path,
    /// Trim bounds; both `None` for a whole-file transcode.
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub bitrate: &'a str,
    pub tags: OutputTags,
}

/// The external decrypt/transcode tool. Its exit status is the only success
/// signal.
pub trait Transcoder: Send + Sync {
    fn probe(&self, source: &Path, decryption: &Decryption) -> Result<ProbeInfo, TranscodeError>;

    fn transcode(&self, request: &TranscodeRequest<'_>) -> Result<(), TranscodeError>;
}
