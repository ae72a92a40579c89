// Subprocess runner: drives one engine invocation per encode pass and
// streams parsed status back to the job's sink

use anyhow::{Context, Result};
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::job::{Job, Outcome, StatusSink};
use super::process_ctl;
use super::status::{self, StatusParser};
use crate::config::EnginePaths;

/// How often a blocked read loop re-checks the pause/stop flags
const CONTROL_POLL: Duration = Duration::from_millis(100);

/// Runs jobs against the external engine
pub struct Runner {
    paths: EnginePaths,
}

impl Runner {
    pub fn new(paths: EnginePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    /// Execute every pass of the job in order, marking the terminal
    /// state on the job and firing the sink's terminal callback once.
    pub fn run(&self, job: &Job, sink: &dyn StatusSink) -> Outcome {
        job.mark_started();
        let passes = job.params.passes();

        let mut outcome = Outcome::Finished;
        for pass_index in 0..passes {
            // Checkpoint between passes: a stop issued during pass 1
            // must not start pass 2
            if job.control().is_stopped() {
                outcome = Outcome::Stopped;
                break;
            }

            match self.run_pass(job, pass_index, passes, sink) {
                Ok(PassResult::Completed) => {}
                Ok(PassResult::Stopped) => {
                    outcome = Outcome::Stopped;
                    break;
                }
                Ok(PassResult::Failed(diagnostic)) => {
                    job.update_status(|s| s.error = Some(diagnostic));
                    outcome = Outcome::Failed;
                    break;
                }
                Err(e) => {
                    warn!(job = %job.id, "engine invocation failed: {e:#}");
                    job.update_status(|s| s.error = Some(format!("{e:#}")));
                    outcome = Outcome::Failed;
                    break;
                }
            }
        }

        job.mark_terminal(
            outcome,
            None, // error text already recorded where it was observed
        );
        sink.on_terminal(job, outcome);
        outcome
    }

    fn run_pass(
        &self,
        job: &Job,
        pass_index: u32,
        passes: u32,
        sink: &dyn StatusSink,
    ) -> Result<PassResult> {
        let mut cmd = build_pass_command(&self.paths, job, pass_index);
        debug!(job = %job.id, pass = pass_index + 1, "spawning engine");

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().context("Failed to spawn engine")?;
        let pid = child.id();

        // Both streams feed one line channel; status tokens can appear
        // on either
        let (line_tx, line_rx) = mpsc::channel::<String>();
        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;
        let out_thread = spawn_line_reader(stdout, line_tx.clone());
        let err_thread = spawn_line_reader(stderr, line_tx);

        let read_result = self.read_loop(job, pass_index, passes, pid, &line_rx, sink);

        // Readers finish once the child's pipes close
        let stopped = match read_result {
            ReadLoop::Stopped => {
                let _ = process_ctl::resume(pid);
                if let Err(e) = child.kill() {
                    warn!(job = %job.id, "kill after stop failed: {e}");
                }
                true
            }
            ReadLoop::StreamEnded => false,
        };

        let status = child.wait().context("Failed to wait for engine")?;
        let last_line = out_thread
            .join()
            .ok()
            .into_iter()
            .chain(err_thread.join().ok())
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or_default();

        if stopped {
            return Ok(PassResult::Stopped);
        }
        // Exit code only decides the outcome when the caller did not
        // stop the job
        if !status.success() {
            let diagnostic = if last_line.is_empty() {
                format!("engine exited with status {status}")
            } else {
                last_line
            };
            return Ok(PassResult::Failed(diagnostic));
        }

        Ok(PassResult::Completed)
    }

    /// Consume status lines until the streams close or the job is
    /// stopped, honoring pause at each line boundary
    fn read_loop(
        &self,
        job: &Job,
        pass_index: u32,
        passes: u32,
        pid: u32,
        lines: &Receiver<String>,
        sink: &dyn StatusSink,
    ) -> ReadLoop {
        let mut parser = StatusParser::new();

        loop {
            if job.control().is_stopped() {
                return ReadLoop::Stopped;
            }

            if job.control().is_paused() {
                if let Err(e) = process_ctl::suspend(pid) {
                    warn!(job = %job.id, "pause unavailable: {e}");
                    // Keep running rather than fake a suspension
                    job.control().resume();
                } else {
                    job.update_status(|s| s.speed = None);
                    let stopped = job.control().wait_while_paused();
                    if stopped {
                        return ReadLoop::Stopped;
                    }
                    if let Err(e) = process_ctl::resume(pid) {
                        warn!(job = %job.id, "resume failed: {e}");
                    }
                }
            }

            let line = match lines.recv_timeout(CONTROL_POLL) {
                Ok(line) => line,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return ReadLoop::StreamEnded,
            };

            if parser.parse_line(&line) {
                self.apply_status(job, &parser, pass_index, passes);
                sink.on_progress(job);
            }
        }
    }

    fn apply_status(&self, job: &Job, parser: &StatusParser, pass_index: u32, passes: u32) {
        let duration = job.duration_s;
        job.update_status(|s| {
            if let Some(b) = parser.bitrate_kbps {
                s.bitrate_kbps = Some(b);
            }
            if let Some(kb) = parser.size_kb {
                s.size_kb = Some(kb);
            }
            if let Some(speed) = parser.speed {
                s.speed = Some(speed);
            }
            if let Some(t) = parser.time_s {
                s.position_s = t;
                let p = status::progress_fraction(t, duration, pass_index, passes);
                // Never move backwards on a late or reordered line
                if p > s.progress {
                    s.progress = p;
                }
                if let Some(speed) = s.speed {
                    s.time_left_s = status::time_left(t, duration, pass_index, passes, speed);
                }
            }
        });
    }
}

enum PassResult {
    Completed,
    Stopped,
    Failed(String),
}

enum ReadLoop {
    Stopped,
    StreamEnded,
}

/// Read a pipe, splitting on both '\n' and the '\r' the engine uses to
/// repaint its status line, forwarding each piece and returning the
/// last one for diagnostics
fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    tx: Sender<String>,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = [0u8; 4096];
        let mut current = Vec::new();
        let mut last_line = String::new();

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            for &byte in &buf[..n] {
                if byte == b'\n' || byte == b'\r' {
                    if !current.is_empty() {
                        let line = String::from_utf8_lossy(&current).into_owned();
                        current.clear();
                        if !line.trim().is_empty() {
                            last_line = line.clone();
                        }
                        if tx.send(line).is_err() {
                            return last_line;
                        }
                    }
                } else {
                    current.push(byte);
                }
            }
        }
        if !current.is_empty() {
            let line = String::from_utf8_lossy(&current).into_owned();
            if !line.trim().is_empty() {
                last_line = line.clone();
            }
            let _ = tx.send(line);
        }
        last_line
    })
}

/// Assemble the engine command line for one pass of a job
pub fn build_pass_command(paths: &EnginePaths, job: &Job, pass_index: u32) -> Command {
    let mut cmd = Command::new(&paths.ffmpeg);
    cmd.arg("-y").arg("-hide_banner");

    if let Some(trim) = &job.params.trim {
        cmd.arg("-ss").arg(format!("{}", trim.start_s));
    }

    cmd.arg("-i").arg(&job.input_path);

    if let Some(trim) = &job.params.trim {
        cmd.arg("-t").arg(format!("{}", trim.duration_s));
    }

    if job.params.has_video {
        cmd.arg("-c:v").arg(job.params.codec.encoder_name());
        for arg in &job.params.video_args {
            cmd.arg(arg);
        }
    } else {
        cmd.arg("-vn");
    }

    let two_pass = job.params.passes() == 2;
    if two_pass {
        let log_prefix = job.output_path.with_extension("passlog");
        cmd.arg("-pass").arg((pass_index + 1).to_string());
        cmd.arg("-passlogfile").arg(&log_prefix);
    }

    if two_pass && pass_index == 0 {
        // First pass only collects statistics
        cmd.arg("-an").arg("-f").arg("null").arg(null_sink());
    } else {
        if job.params.has_audio {
            if job.params.audio_args.is_empty() {
                cmd.arg("-c:a").arg("copy");
            } else {
                for arg in &job.params.audio_args {
                    cmd.arg(arg);
                }
            }
        } else {
            cmd.arg("-an");
        }
        cmd.arg(&job.output_path);
    }

    cmd
}

fn null_sink() -> &'static Path {
    if cfg!(windows) {
        Path::new("NUL")
    } else {
        Path::new("/dev/null")
    }
}
