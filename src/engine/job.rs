// Job model: one submitted encode request with live, mutable status

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use uuid::Uuid;

/// Codec families the dispatcher routes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecFamily {
    X264,
    X265,
    Vp9,
    NvencH264,
    NvencHevc,
    Copy,
}

impl CodecFamily {
    /// All families that get their own queue in per-codec mode
    pub const ALL: &'static [CodecFamily] = &[
        Self::X264,
        Self::X265,
        Self::Vp9,
        Self::NvencH264,
        Self::NvencHevc,
        Self::Copy,
    ];

    pub fn is_nvenc(&self) -> bool {
        matches!(self, Self::NvencH264 | Self::NvencHevc)
    }

    /// Get the FFmpeg encoder name
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::X264 => "libx264",
            Self::X265 => "libx265",
            Self::Vp9 => "libvpx-vp9",
            Self::NvencH264 => "h264_nvenc",
            Self::NvencHevc => "hevc_nvenc",
            Self::Copy => "copy",
        }
    }

    /// Stable lowercase name used in the config file and on the CLI
    pub fn key(&self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::X265 => "x265",
            Self::Vp9 => "vp9",
            Self::NvencH264 => "nvenc-h264",
            Self::NvencHevc => "nvenc-hevc",
            Self::Copy => "copy",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::X265 => "x265",
            Self::Vp9 => "VP9",
            Self::NvencH264 => "NVENC H.264",
            Self::NvencHevc => "NVENC HEVC",
            Self::Copy => "copy",
        }
    }
}

/// Trim window in seconds from the start of the input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trim {
    pub start_s: f64,
    pub duration_s: f64,
}

/// Encoder parameters for one job. The queue core treats this as an
/// opaque bag: it is built by the caller, read here only to assemble a
/// command line and to pick a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub codec: CodecFamily,
    /// Output container extension without the dot ("mkv", "mp4", ...)
    pub container: String,
    #[serde(default)]
    pub two_pass: bool,
    #[serde(default = "default_true")]
    pub has_video: bool,
    #[serde(default = "default_true")]
    pub has_audio: bool,
    #[serde(default)]
    pub trim: Option<Trim>,
    /// Extra `-c:v`-side arguments, already split
    #[serde(default)]
    pub video_args: Vec<String>,
    /// Extra `-c:a`-side arguments, already split
    #[serde(default)]
    pub audio_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl JobParams {
    pub fn new(codec: CodecFamily, container: &str) -> Self {
        Self {
            codec,
            container: container.to_string(),
            two_pass: false,
            has_video: true,
            has_audio: true,
            trim: None,
            video_args: Vec::new(),
            audio_args: Vec::new(),
        }
    }

    /// Number of encode passes this job runs (1 or 2)
    pub fn passes(&self) -> u32 {
        if self.two_pass { 2 } else { 1 }
    }
}

/// What kind of work a submitted job represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// A single input file to encode
    Encode,
    /// A directory to expand into one child job per video file
    Folder,
    /// A directory to monitor continuously
    WatchFolder,
}

/// Live status block, written by the one worker owning the job and
/// read by the caller between callbacks
#[derive(Debug, Clone, Default)]
pub struct JobStatus {
    pub bitrate_kbps: Option<f64>,
    pub size_kb: Option<u64>,
    pub position_s: f64,
    pub speed: Option<f64>,
    /// 0.0..=1.0; monotone while running, forced to 1.0 on success.
    /// For 2-pass jobs each pass contributes a flat 50% share, so the
    /// ETA is biased when pass wall-clocks differ; that split is kept
    /// for compatibility with the original scheduler.
    pub progress: f64,
    pub time_left_s: Option<f64>,
    pub started: bool,
    pub done: bool,
    pub failed: bool,
    pub error: Option<String>,
    /// Non-fatal warning raised before the encode started (e.g. the
    /// hardware encoder rejected the parameters in a dry run)
    pub advisory: Option<String>,
}

/// Terminal outcome reported exactly once per job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Failed,
    Stopped,
}

/// Pause/stop control surface. The caller flips flags from its thread;
/// the runner observes them at its checkpoints. The condvar wakes a
/// runner blocked in a pause wait (resume, stop, or shutdown).
#[derive(Debug, Default)]
pub struct JobControl {
    flags: Mutex<ControlFlags>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    stopped: bool,
}

impl JobControl {
    pub fn pause(&self) {
        self.flags.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        self.flags.lock().unwrap().paused = false;
        self.cond.notify_all();
    }

    pub fn stop(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.stopped = true;
        flags.paused = false;
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.flags.lock().unwrap().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.lock().unwrap().stopped
    }

    /// Block until resumed or stopped. Returns true if the job was
    /// stopped while waiting.
    pub fn wait_while_paused(&self) -> bool {
        let mut flags = self.flags.lock().unwrap();
        while flags.paused && !flags.stopped {
            flags = self.cond.wait(flags).unwrap();
        }
        flags.stopped
    }
}

/// One unit of encode work
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub params: JobParams,
    pub kind: JobKind,
    /// Source duration in seconds, probed before submission
    pub duration_s: f64,
    status: Mutex<JobStatus>,
    control: JobControl,
    /// Set for chunk sub-jobs; stop/pause observed through the parent
    parent: Option<Arc<Job>>,
}

impl Job {
    pub fn new(input_path: PathBuf, output_path: PathBuf, params: JobParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            output_path,
            params,
            kind: JobKind::Encode,
            duration_s: 0.0,
            status: Mutex::new(JobStatus::default()),
            control: JobControl::default(),
            parent: None,
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = duration_s;
        self
    }

    /// Build a chunk sub-job that answers pause/stop through `parent`
    pub fn chunk_of(
        parent: &Arc<Job>,
        input_path: PathBuf,
        output_path: PathBuf,
        params: JobParams,
        duration_s: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            output_path,
            params,
            kind: JobKind::Encode,
            duration_s,
            status: Mutex::new(JobStatus::default()),
            control: JobControl::default(),
            parent: Some(parent.clone()),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Job>> {
        self.parent.as_ref()
    }

    /// The control surface governing this job: chunks defer to their
    /// parent so one stop/pause reaches every sub-process.
    pub fn control(&self) -> &JobControl {
        match &self.parent {
            Some(parent) => parent.control(),
            None => &self.control,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn update_status<F: FnOnce(&mut JobStatus)>(&self, f: F) {
        let mut status = self.status.lock().unwrap();
        f(&mut status);
    }

    pub fn mark_started(&self) {
        self.update_status(|s| s.started = true);
    }

    /// Record a non-fatal warning on the status block; the job still
    /// runs
    pub fn note_advisory(&self, message: &str) {
        self.update_status(|s| s.advisory = Some(message.to_string()));
    }

    /// Record a terminal outcome. `failed` and a stop never mix: a job
    /// stopped by the caller reports Stopped regardless of exit code.
    pub fn mark_terminal(&self, outcome: Outcome, error: Option<String>) {
        self.update_status(|s| match outcome {
            Outcome::Finished => {
                s.done = true;
                s.progress = 1.0;
                s.time_left_s = Some(0.0);
            }
            Outcome::Failed => {
                s.done = true;
                s.failed = true;
                if error.is_some() {
                    s.error = error;
                }
            }
            Outcome::Stopped => {
                s.done = true;
            }
        });
    }
}

/// Status observer the caller registers at submission time. Replaces
/// the ad hoc per-field signal objects of older designs with one
/// explicit interface.
pub trait StatusSink: Send + Sync {
    /// Called after every successfully parsed status line
    fn on_progress(&self, job: &Job);

    /// Called exactly once when the job reaches a terminal state
    fn on_terminal(&self, job: &Job, outcome: Outcome);

    /// Called for non-fatal warnings raised before the encode starts;
    /// the job proceeds regardless
    fn on_advisory(&self, _job: &Job, _message: &str) {}
}

/// Sink that drops everything; handy default for batch paths
pub struct NullSink;

impl StatusSink for NullSink {
    fn on_progress(&self, _job: &Job) {}
    fn on_terminal(&self, _job: &Job, _outcome: Outcome) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_job() -> Job {
        Job::new(
            PathBuf::from("/tmp/in.mkv"),
            PathBuf::from("/tmp/out.mkv"),
            JobParams::new(CodecFamily::X264, "mkv"),
        )
    }

    #[test]
    fn test_passes() {
        let mut params = JobParams::new(CodecFamily::X265, "mp4");
        assert_eq!(params.passes(), 1);
        params.two_pass = true;
        assert_eq!(params.passes(), 2);
    }

    #[test]
    fn test_nvenc_families() {
        assert!(CodecFamily::NvencH264.is_nvenc());
        assert!(CodecFamily::NvencHevc.is_nvenc());
        assert!(!CodecFamily::X264.is_nvenc());
        assert!(!CodecFamily::Copy.is_nvenc());
    }

    #[test]
    fn test_stop_clears_pause_wait() {
        let job = test_job();
        job.control().pause();
        assert!(job.control().is_paused());

        job.control().stop();
        // A runner parked in the pause wait must come back out
        assert!(job.control().wait_while_paused());
        assert!(job.control().is_stopped());
    }

    #[test]
    fn test_finished_forces_full_progress() {
        let job = test_job();
        job.update_status(|s| s.progress = 0.997);
        job.mark_terminal(Outcome::Finished, None);

        let status = job.status();
        assert_eq!(status.progress, 1.0);
        assert!(status.done);
        assert!(!status.failed);
    }

    #[test]
    fn test_advisory_recorded_without_marking_terminal() {
        let job = test_job();
        job.note_advisory("encoder rejected the parameters in a dry run");

        let status = job.status();
        assert_eq!(
            status.advisory.as_deref(),
            Some("encoder rejected the parameters in a dry run")
        );
        assert!(!status.done);
        assert!(!status.failed);
    }

    #[test]
    fn test_stopped_is_not_failed() {
        let job = test_job();
        job.control().stop();
        job.mark_terminal(Outcome::Stopped, None);

        let status = job.status();
        assert!(status.done);
        assert!(!status.failed);
    }

    #[test]
    fn test_chunk_shares_parent_control() {
        let parent = Arc::new(test_job());
        let chunk = Job::chunk_of(
            &parent,
            parent.input_path.clone(),
            PathBuf::from("/tmp/chunk_000.mkv"),
            JobParams::new(CodecFamily::X264, "mkv"),
            25.0,
        );

        parent.control().stop();
        assert!(chunk.control().is_stopped());

        // Status blocks stay independent
        chunk.update_status(|s| s.progress = 0.5);
        assert_eq!(parent.status().progress, 0.0);
    }
}
