//! [`Transcoder`] that shells out to ffmpeg / ffprobe.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{Decryption, ProbeInfo, TranscodeError, TranscodeRequest, Transcoder};

/// Keep the tail of stderr only; ffmpeg prints its banner first.
const MAX_STDERR_CHARS: usize = 500;

#[derive(Debug, Default, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
}

pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    default_bitrate: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, default_bitrate: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            default_bitrate: default_bitrate.to_string(),
        }
    }

    fn run(tool: &Path, args: &[OsString]) -> Result<Output, TranscodeError> {
        let tool_name = tool.display().to_string();
        let output = Command::new(tool)
            .args(args)
            .output()
            .map_err(|e| TranscodeError::Spawn {
                tool: tool_name.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Exit {
                tool: tool_name,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(output)
    }

    fn parse_probe(&self, stdout: &[u8]) -> Result<ProbeInfo, TranscodeError> {
        let doc: ProbeDocument = serde_json::from_slice(stdout)?;
        let bitrate = doc
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.trim().parse::<u64>().ok())
            .filter(|&b| b > 0)
            .map(|b| format!("{}k", b / 1000))
            .unwrap_or_else(|| self.default_bitrate.clone());

        Ok(ProbeInfo {
            bitrate,
            artist: doc.format.tags.artist.unwrap_or_default(),
            album: doc.format.tags.album.unwrap_or_default(),
        })
    }
}

impl Transcoder for FfmpegTranscoder {
    fn probe(&self, source: &Path, decryption: &Decryption) -> Result<ProbeInfo, TranscodeError> {
        let output = Self::run(&self.ffprobe, &probe_args(source, decryption))?;
        self.parse_probe(&output.stdout)
    }

    fn transcode(&self, request: &TranscodeRequest<'_>) -> Result<(), TranscodeError> {
        Self::run(&self.ffmpeg, &transcode_args(request)).map(|_| ())
    }
}

fn decryption_args(decryption: &Decryption) -> Vec<OsString> {
    match decryption {
        Decryption::Voucher { key, iv } => vec![
            "-audible_key".into(),
            key.expose_secret().into(),
            "-audible_iv".into(),
            iv.expose_secret().into(),
        ],
        Decryption::Legacy { activation_token } => vec![
            "-activation_bytes".into(),
            activation_token.expose_secret().into(),
        ],
    }
}

fn probe_args(source: &Path, decryption: &Decryption) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-v".into(),
        "quiet".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
    ];
    args.extend(decryption_args(decryption));
    args.push("-i".into());
    args.push(source.into());
    args
}

/// `ffmpeg -v error <decrypt> -i SRC [-ss S -to E] -vn -codec:a libmp3lame
/// -ab RATE -map_metadata -1 -metadata k=v... -y OUT`
fn transcode_args(request: &TranscodeRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-v".into(), "error".into()];
    args.extend(decryption_args(request.decryption));
    args.push("-i".into());
    args.push(request.source.into());

    if let Some(start) = request.start_ms {
        args.push("-ss".into());
        args.push(seconds(start).into());
    }
    if let Some(end) = request.end_ms {
        args.push("-to".into());
        args.push(seconds(end).into());
    }

    for arg in ["-vn", "-codec:a", "libmp3lame", "-ab", request.bitrate, "-map_metadata", "-1"] {
        args.push(arg.into());
    }

    let tags = &request.tags;
    for (key, value) in [
        ("title", &tags.title),
        ("artist", &tags.artist),
        ("album", &tags.album),
        ("track", &tags.track),
    ] {
        args.push("-metadata".into());
        args.push(format!("{}={}", key, value).into());
    }

    args.push("-y".into());
    args.push(request.output.into());
    args
}

fn seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(MAX_STDERR_CHARS);
    text.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::OutputTags;
    use secrecy::SecretString;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn voucher() -> Decryption {
        Decryption::Voucher {
            key: SecretString::from("k3y".to_string()),
            iv: SecretString::from("1v".to_string()),
        }
    }

    #[test]
    fn test_chapter_args() {
        let decryption = voucher();
        let request = TranscodeRequest {
            source: Path::new("/b/job-1/audio.aaxc"),
            decryption: &decryption,
            output: Path::new("/b/job-1/mp3/001 - One.partial.mp3"),
            start_ms: Some(1_500),
            end_ms: Some(62_005),
            bitrate: "64k",
            tags: OutputTags {
                title: "One".to_string(),
                artist: "Ann".to_string(),
                album: "A Book".to_string(),
                track: "1/3".to_string(),
            },
        };

        let args = strings(&transcode_args(&request));
        assert_eq!(
            args,
            vec![
                "-v", "error", "-audible_key", "k3y", "-audible_iv", "1v", "-i",
                "/b/job-1/audio.aaxc", "-ss", "1.500", "-to", "62.005", "-vn", "-codec:a",
                "libmp3lame", "-ab", "64k", "-map_metadata", "-1", "-metadata", "title=One",
                "-metadata", "artist=Ann", "-metadata", "album=A Book", "-metadata",
                "track=1/3", "-y", "/b/job-1/mp3/001 - One.partial.mp3",
            ]
        );
    }

    #[test]
    fn test_legacy_probe_args() {
        let decryption = Decryption::Legacy {
            activation_token: SecretString::from("deadbeef".to_string()),
        };
        let args = strings(&probe_args(Path::new("/b/audio.aax"), &decryption));
        assert_eq!(
            args,
            vec![
                "-v", "quiet", "-print_format", "json", "-show_format", "-activation_bytes",
                "deadbeef", "-i", "/b/audio.aax",
            ]
        );
    }

    #[test]
    fn test_parse_probe() {
        let t = FfmpegTranscoder::new("ffmpeg", "ffprobe", "128k");
        let info = t
            .parse_probe(br#"{"format": {"bit_rate": "64021", "tags": {"artist": "Ann", "album": "A Book"}}}"#)
            .unwrap();
        assert_eq!(
            info,
            ProbeInfo {
                bitrate: "64k".to_string(),
                artist: "Ann".to_string(),
                album: "A Book".to_string(),
            }
        );

        let bare = t.parse_probe(b"{}").unwrap();
        assert_eq!(bare.bitrate, "128k");
        assert_eq!(bare.artist, "");
    }

    #[test]
    fn test_missing_tool_is_spawn_error() {
        let t = FfmpegTranscoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe", "128k");
        let err = t.probe(Path::new("/tmp/a.aax"), &voucher()).unwrap_err();
        assert!(matches!(err, TranscodeError::Spawn { .. }));
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = format!("{}END", "x".repeat(1000));
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), MAX_STDERR_CHARS);
        assert!(tail.ends_with("END"));
    }
}
