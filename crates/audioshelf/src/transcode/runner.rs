//! Per-chapter transcoding with a bounded pool of worker threads.
//!
//! Chapters are independent: each reads the shared source and writes its own
//! output file. A chapter whose output already exists is skipped, which makes
//! the stage safe to re-run after a crash. Workers only report completions;
//! the coordinating thread owns the counter and issues every progress write,
//! so concurrent completions can never lose an update.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info, warn};

use super::{Decryption, OutputTags, ProbeInfo, TranscodeError, TranscodeRequest, Transcoder};
use crate::chapters::ChapterSegment;
use crate::pipeline::progress::{ProgressBand, ProgressReporter};
use crate::sanitize::chapter_file_stem;

/// Suffix of a chapter output still being written by the transcoder.
pub const PARTIAL_SUFFIX: &str = ".partial.mp3";

/// Output name when the source has no chapter metadata.
pub const WHOLE_FILE_NAME: &str = "audiobook.mp3";

/// Everything the stage needs about one job.
pub struct StageInput<'a> {
    pub source: &'a Path,
    pub decryption: &'a Decryption,
    /// Empty means one whole-file transcode.
    pub segments: &'a [ChapterSegment],
    pub output_dir: &'a Path,
    /// Used as the output title when there are no chapters.
    pub title: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Every expected output, in chapter order.
    pub outputs: Vec<PathBuf>,
    /// External tool invocations made by this run.
    pub transcoded: usize,
    /// Outputs that already existed.
    pub skipped: usize,
}

struct ChapterTask {
    /// 1-based.
    index: usize,
    output: PathBuf,
    partial: PathBuf,
    start_ms: Option<u64>,
    end_ms: Option<u64>,
    tags: OutputTags,
}

pub struct TranscodeStage {
    transcoder: Arc<dyn Transcoder>,
    parallelism: usize,
    default_bitrate: String,
}

impl TranscodeStage {
    pub fn new(transcoder: Arc<dyn Transcoder>, parallelism: usize, default_bitrate: &str) -> Self {
        Self {
            transcoder,
            parallelism: parallelism.max(1),
            default_bitrate: default_bitrate.to_string(),
        }
    }

    /// Produces one output per segment (or one whole-file output), reporting
    /// progress inside `band`. The first chapter failure stops the pool and
    /// fails the stage; outputs already written stay on disk.
    pub fn run(
        &self,
        input: &StageInput<'_>,
        band: ProgressBand,
        progress: &dyn ProgressReporter,
    ) -> Result<StageOutcome, TranscodeError> {
        let probe = self.probe(input);
        let tasks = plan(input, &probe);
        let total = tasks.len();
        let outputs: Vec<PathBuf> = tasks.iter().map(|t| t.output.clone()).collect();

        let pending: Vec<ChapterTask> = tasks.into_iter().filter(|t| !t.output.exists()).collect();
        let skipped = total - pending.len();
        let transcoded = pending.len();
        if skipped > 0 {
            info!("{} of {} chapter(s) already converted, skipping them", skipped, total);
        }
        progress.report(band.scale(skipped as u64, total as u64), &chapter_detail(skipped, total));

        if !pending.is_empty() {
            self.run_pool(input, &probe.bitrate, pending, skipped, total, band, progress)?;
        }

        Ok(StageOutcome {
            outputs,
            transcoded,
            skipped,
        })
    }

    fn probe(&self, input: &StageInput<'_>) -> ProbeInfo {
        match self.transcoder.probe(input.source, input.decryption) {
            Ok(info) => info,
            Err(e) => {
                warn!("Probe failed, using default bitrate {}: {}", self.default_bitrate, e);
                ProbeInfo {
                    bitrate: self.default_bitrate.clone(),
                    artist: String::new(),
                    album: String::new(),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pool(
        &self,
        input: &StageInput<'_>,
        bitrate: &str,
        pending: Vec<ChapterTask>,
        already_done: usize,
        total: usize,
        band: ProgressBand,
        progress: &dyn ProgressReporter,
    ) -> Result<(), TranscodeError> {
        let width = self.parallelism.min(pending.len());
        let expected = pending.len();
        let (task_tx, task_rx) = unbounded::<ChapterTask>();
        let (done_tx, done_rx) = bounded::<(usize, Result<(), TranscodeError>)>(width * 2);
        for task in pending {
            // Cannot fail: task_rx is alive.
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let cancel = AtomicBool::new(false);
        let parent = tracing::Span::current();
        debug!("Transcoding {} chapter(s) on {} thread(s)", expected, width);

        thread::scope(|scope| {
            for _ in 0..width {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                let cancel = &cancel;
                let parent = &parent;
                scope.spawn(move || {
                    self.chapter_worker(input, bitrate, task_rx, done_tx, cancel, parent)
                });
            }
            drop(done_tx);

            let mut done = already_done;
            let mut finished = 0;
            let mut first_error = None;
            for (index, result) in done_rx.iter() {
                finished += 1;
                match result {
                    Ok(()) => {
                        done += 1;
                        progress.report(band.scale(done as u64, total as u64), &chapter_detail(done, total));
                    }
                    Err(e) => {
                        warn!("Chapter {} failed: {}", index, e);
                        cancel.store(true, Ordering::Relaxed);
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None if finished < expected => Err(TranscodeError::PoolStopped),
                None => Ok(()),
            }
        })
    }

    fn chapter_worker(
        &self,
        input: &StageInput<'_>,
        bitrate: &str,
        tasks: Receiver<ChapterTask>,
        done: Sender<(usize, Result<(), TranscodeError>)>,
        cancel: &AtomicBool,
        parent: &tracing::Span,
    ) {
        while let Ok(task) = tasks.recv() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let span = tracing::info_span!(parent: parent, "chapter", index = task.index);
            let result = span.in_scope(|| self.convert_chapter(input, bitrate, &task));
            let failed = result.is_err();
            if done.send((task.index, result)).is_err() || failed {
                break;
            }
        }
    }

    fn convert_chapter(
        &self,
        input: &StageInput<'_>,
        bitrate: &str,
        task: &ChapterTask,
    ) -> Result<(), TranscodeError> {
        // A leftover from a crashed attempt is never trusted.
        match std::fs::remove_file(&task.partial) {
            Ok(()) => debug!("Removed stale partial output for chapter {}", task.index),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(TranscodeError::Io {
                    path: task.partial.clone(),
                    source: e,
                })
            }
        }

        self.transcoder.transcode(&TranscodeRequest {
            source: input.source,
            decryption: input.decryption,
            output: &task.partial,
            start_ms: task.start_ms,
            end_ms: task.end_ms,
            bitrate,
            tags: task.tags.clone(),
        })?;

        std::fs::rename(&task.partial, &task.output).map_err(|e| TranscodeError::Io {
            path: task.output.clone(),
            source: e,
        })?;
        debug!("Chapter {} done", task.index);
        Ok(())
    }
}

fn plan(input: &StageInput<'_>, probe: &ProbeInfo) -> Vec<ChapterTask> {
    if input.segments.is_empty() {
        let output = input.output_dir.join(WHOLE_FILE_NAME);
        return vec![ChapterTask {
            index: 1,
            partial: partial_path(&output),
            output,
            start_ms: None,
            end_ms: None,
            tags: OutputTags {
                title: input.title.to_string(),
                artist: probe.artist.clone(),
                album: probe.album.clone(),
                track: "1/1".to_string(),
            },
        }];
    }

    let total = input.segments.len();
    input
        .segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let index = i + 1;
            let stem = chapter_file_stem(index, &segment.title);
            ChapterTask {
                index,
                output: input.output_dir.join(format!("{}.mp3", stem)),
                partial: input.output_dir.join(format!("{}{}", stem, PARTIAL_SUFFIX)),
                start_ms: Some(segment.start_offset_ms),
                end_ms: Some(segment.end_offset_ms()),
                tags: OutputTags {
                    title: segment.title.clone(),
                    artist: probe.artist.clone(),
                    album: probe.album.clone(),
                    track: format!("{}/{}", index, total),
                },
            }
        })
        .collect()
}

fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{}{}", stem, PARTIAL_SUFFIX))
}

fn chapter_detail(done: usize, total: usize) -> String {
    format!("Chapter {} / {}", done, total)
}
