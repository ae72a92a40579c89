// Chunked encode pipeline: slice one input into time intervals, encode
// them in parallel, then concatenate and mux back together

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, warn};

use super::job::{Job, JobParams, Outcome, StatusSink, Trim};
use crate::config::EnginePaths;

/// Chunks shorter than this are not worth the split/concat overhead
const MIN_CHUNK_SECONDS: f64 = 10.0;

/// A job qualifies for chunking only with video settings and a span
/// long enough that every chunk clears the minimum:
/// untrimmed jobs need `duration / chunks >= 10s`; trimmed jobs also
/// need audio settings and judge the trimmed span instead.
pub fn is_eligible(params: &JobParams, duration_s: f64, chunk_count: u32) -> bool {
    if !params.has_video || chunk_count < 2 {
        return false;
    }
    match &params.trim {
        None => duration_s / chunk_count as f64 >= MIN_CHUNK_SECONDS,
        Some(trim) => {
            params.has_audio && trim.duration_s / chunk_count as f64 >= MIN_CHUNK_SECONDS
        }
    }
}

/// Partition `[start, start+span)` into `count` contiguous intervals
/// `(start, duration)`. The whole-second base length comes from integer
/// division; the first and last intervals absorb the remainder so the
/// union covers the span exactly.
pub fn plan_intervals(start: f64, span: f64, count: u32) -> Vec<(f64, f64)> {
    let count = count.max(1);
    if count == 1 {
        return vec![(start, span)];
    }

    let base = (span / count as f64).floor();
    let remainder = span - base * count as f64;
    let mut intervals = Vec::with_capacity(count as usize);

    let first_len = base + remainder / 2.0;
    intervals.push((start, first_len));
    let mut cursor = start + first_len;
    for _ in 1..count - 1 {
        intervals.push((cursor, base));
        cursor += base;
    }
    // Last interval runs to the exact end of the span
    intervals.push((cursor, start + span - cursor));

    intervals
}

/// Everything generated for one chunked job
pub struct ChunkSet {
    pub video_chunks: Vec<Arc<Job>>,
    pub audio_job: Arc<Job>,
    pub work_dir: PathBuf,
}

/// Build the sub-jobs for `parent`: one video-only job per interval
/// plus exactly one audio-only job covering the whole span
pub fn build_chunk_set(parent: &Arc<Job>, chunk_count: u32, temp_dir: &Path) -> Result<ChunkSet> {
    let work_dir = temp_dir.join(format!("chunks_{}", parent.id));
    fs::create_dir_all(&work_dir).context("Failed to create chunk work directory")?;

    let (span_start, span_len) = match &parent.params.trim {
        Some(trim) => (trim.start_s, trim.duration_s),
        None => (0.0, parent.duration_s),
    };

    let container = parent.params.container.clone();
    let mut video_chunks = Vec::new();
    for (index, (start, len)) in plan_intervals(span_start, span_len, chunk_count)
        .into_iter()
        .enumerate()
    {
        let mut params = parent.params.clone();
        params.has_audio = false;
        params.trim = Some(Trim {
            start_s: start,
            duration_s: len,
        });
        let output = work_dir.join(format!("chunk_{index:03}.{container}"));
        video_chunks.push(Arc::new(Job::chunk_of(
            parent,
            parent.input_path.clone(),
            output,
            params,
            len,
        )));
    }

    let mut audio_params = parent.params.clone();
    audio_params.has_video = false;
    audio_params.two_pass = false;
    if span_start > 0.0 || parent.params.trim.is_some() {
        audio_params.trim = Some(Trim {
            start_s: span_start,
            duration_s: span_len,
        });
    }
    let audio_job = Arc::new(Job::chunk_of(
        parent,
        parent.input_path.clone(),
        work_dir.join(format!("audio.{container}")),
        audio_params,
        span_len,
    ));

    Ok(ChunkSet {
        video_chunks,
        audio_job,
        work_dir,
    })
}

/// Write the engine's concat list: one `file '<name>'` line per chunk,
/// in chunk order
pub fn write_concat_list(work_dir: &Path, chunks: &[Arc<Job>]) -> Result<PathBuf> {
    let list_path = work_dir.join("concat.txt");
    let mut body = String::new();
    for chunk in chunks {
        let name = chunk
            .output_path
            .file_name()
            .context("chunk output has no file name")?
            .to_string_lossy();
        body.push_str(&format!("file '{name}'\n"));
    }
    fs::write(&list_path, body).context("Failed to write concat list")?;
    Ok(list_path)
}

/// Concatenate the finished chunks into one temporary video file
pub fn concat_chunks(paths: &EnginePaths, list_path: &Path, output: &Path) -> Result<()> {
    let status = Command::new(&paths.ffmpeg)
        .args(["-y", "-hide_banner", "-f", "concat", "-safe", "0", "-i"])
        .arg(list_path)
        .args(["-c", "copy"])
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("Failed to run engine concat")?;
    if !status.success() {
        anyhow::bail!("concat exited with status {status}");
    }
    Ok(())
}

/// Stream-copy mux of the concatenated video with the audio track into
/// the final output path
pub fn mux_streams(paths: &EnginePaths, video: &Path, audio: &Path, output: &Path) -> Result<()> {
    let status = Command::new(&paths.ffmpeg)
        .args(["-y", "-hide_banner", "-i"])
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args(["-c", "copy"])
        .arg(output)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("Failed to run engine mux")?;
    if !status.success() {
        anyhow::bail!("mux exited with status {status}");
    }
    Ok(())
}

/// Tracks sub-job completion and folds each chunk's local progress into
/// the parent's aggregate
pub struct ChunkTracker {
    parent: Arc<Job>,
    parent_sink: Arc<dyn StatusSink>,
    total: usize,
    state: Mutex<TrackerState>,
    cond: Condvar,
    progress: Mutex<Vec<f64>>,
    index_of: std::collections::HashMap<uuid::Uuid, usize>,
}

#[derive(Default)]
struct TrackerState {
    finished: usize,
    failed: usize,
    stopped: usize,
}

impl ChunkTracker {
    pub fn new(parent: Arc<Job>, parent_sink: Arc<dyn StatusSink>, subjobs: &[Arc<Job>]) -> Self {
        let index_of = subjobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id, i))
            .collect();
        Self {
            parent,
            parent_sink,
            total: subjobs.len(),
            state: Mutex::new(TrackerState::default()),
            cond: Condvar::new(),
            progress: Mutex::new(vec![0.0; subjobs.len()]),
            index_of,
        }
    }

    /// Block until every sub-job has terminated, then report whether
    /// all of them finished cleanly
    pub fn wait_all(&self) -> SubjobsResult {
        let mut state = self.state.lock().unwrap();
        while state.finished + state.failed + state.stopped < self.total {
            state = self.cond.wait(state).unwrap();
        }
        if state.stopped > 0 {
            SubjobsResult::Stopped
        } else if state.failed > 0 {
            SubjobsResult::Failed
        } else {
            SubjobsResult::Finished
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjobsResult {
    Finished,
    Failed,
    Stopped,
}

impl StatusSink for ChunkTracker {
    fn on_progress(&self, job: &Job) {
        let Some(&index) = self.index_of.get(&job.id) else {
            return;
        };
        let aggregate = {
            let mut progress = self.progress.lock().unwrap();
            progress[index] = job.status().progress;
            progress.iter().sum::<f64>() / self.total as f64
        };
        let status = job.status();
        self.parent.update_status(|s| {
            if aggregate > s.progress {
                s.progress = aggregate;
            }
            s.bitrate_kbps = status.bitrate_kbps.or(s.bitrate_kbps);
            s.speed = status.speed.or(s.speed);
        });
        self.parent_sink.on_progress(&self.parent);
    }

    fn on_terminal(&self, job: &Job, outcome: Outcome) {
        if let Some(&index) = self.index_of.get(&job.id) {
            if outcome == Outcome::Finished {
                self.progress.lock().unwrap()[index] = 1.0;
            }
        }
        let mut state = self.state.lock().unwrap();
        match outcome {
            Outcome::Finished => state.finished += 1,
            Outcome::Failed => state.failed += 1,
            Outcome::Stopped => state.stopped += 1,
        }
        self.cond.notify_all();
    }
}

/// Run the reassembly once the tracker reports success: concat in chunk
/// order, then mux with the audio output. On any sub-job failure the
/// parent is failed and the temp files are left in place for
/// inspection.
pub fn reassemble(paths: &EnginePaths, parent: &Job, set: &ChunkSet) -> Result<()> {
    let list_path = write_concat_list(&set.work_dir, &set.video_chunks)?;
    let joined = set
        .work_dir
        .join(format!("joined.{}", parent.params.container));

    debug!(job = %parent.id, chunks = set.video_chunks.len(), "concatenating chunks");
    concat_chunks(paths, &list_path, &joined)?;
    mux_streams(paths, &joined, &set.audio_job.output_path, &parent.output_path)?;
    Ok(())
}

/// Outcome of a fully chunked encode, mapped from the sub-job results
/// and the reassembly run
pub fn finish_chunked(
    paths: &EnginePaths,
    parent: &Job,
    set: &ChunkSet,
    subjobs: SubjobsResult,
) -> Outcome {
    match subjobs {
        SubjobsResult::Stopped => Outcome::Stopped,
        SubjobsResult::Failed => {
            // Partial chunk outputs stay on disk for diagnostics
            warn!(job = %parent.id, "chunk sub-job failed, skipping reassembly");
            parent.update_status(|s| {
                s.error
                    .get_or_insert_with(|| "chunk encode failed".to_string());
            });
            Outcome::Failed
        }
        SubjobsResult::Finished => match reassemble(paths, parent, set) {
            Ok(()) => Outcome::Finished,
            Err(e) => {
                warn!(job = %parent.id, "reassembly failed: {e:#}");
                parent.update_status(|s| s.error = Some(format!("{e:#}")));
                Outcome::Failed
            }
        },
    }
}
