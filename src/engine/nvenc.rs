// NVENC admission control: treat hardware encoder sessions as a scarce
// resource discovered by probing, gated at job start

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::job::{CodecFamily, JobControl, JobParams};
use crate::config::EnginePaths;

/// Drivers cap concurrent sessions well below this; the probe loop
/// never launches more than the ceiling
pub const SESSION_PROBE_CEILING: u32 = 16;

/// Delay between availability re-probes while a worker waits its turn
const SESSION_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// What probing established about the hardware encoder. Computed once
/// per process and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvencCapability {
    pub encoder_ok: bool,
    pub decoder_ok: bool,
    pub scale_ok: bool,
    /// Largest number of concurrent sessions that fully succeeded
    pub max_sessions: u32,
}

/// Prober service with lazy-init-once capability caching. Construct one
/// and share it; there is deliberately no process-global instance.
pub struct NvencProber {
    paths: EnginePaths,
    cache: Mutex<Option<NvencCapability>>,
    fixed: bool,
}

impl NvencProber {
    pub fn new(paths: EnginePaths) -> Self {
        Self {
            paths,
            cache: Mutex::new(None),
            fixed: false,
        }
    }

    /// A user-supplied session count skips the (slow) discovery probe
    /// entirely; the encoder is taken as usable at the caller's word.
    pub fn with_fixed_sessions(paths: EnginePaths, sessions: u32) -> Self {
        Self {
            paths,
            cache: Mutex::new(Some(NvencCapability {
                encoder_ok: sessions > 0,
                decoder_ok: false,
                scale_ok: false,
                max_sessions: sessions,
            })),
            fixed: true,
        }
    }

    /// Probe (first call) or fetch the cached capability
    pub fn capability(&self) -> NvencCapability {
        let mut cache = self.cache.lock().unwrap();
        if let Some(cap) = *cache {
            return cap;
        }

        let encoder_ok = self.probe_encode_once(Duration::from_secs(30));
        let (decoder_ok, scale_ok) = if encoder_ok {
            (self.listing_contains("-decoders", "h264_cuvid"),
             self.listing_contains("-filters", "scale_cuda"))
        } else {
            (false, false)
        };
        let max_sessions = if encoder_ok {
            discover_with(
                |k| self.probe_concurrent(k),
                SESSION_PROBE_CEILING,
            )
        } else {
            0
        };

        let cap = NvencCapability {
            encoder_ok,
            decoder_ok,
            scale_ok,
            max_sessions,
        };
        info!(
            encoder = cap.encoder_ok,
            decoder = cap.decoder_ok,
            scale = cap.scale_ok,
            sessions = cap.max_sessions,
            "NVENC capability probed"
        );
        *cache = Some(cap);
        cap
    }

    pub fn encoder_usable(&self) -> bool {
        self.capability().encoder_ok
    }

    pub fn max_sessions(&self) -> u32 {
        self.capability().max_sessions
    }

    /// Cheap live check run right before a real NVENC job starts. The
    /// driver's actual headroom can differ from the discovered maximum
    /// when other processes hold sessions.
    pub fn session_available_now(&self) -> bool {
        self.probe_encode_once(Duration::from_secs(10))
    }

    /// Block until a session opens up or the job is stopped. Returns
    /// false only for a stop; admission failures are retried, never
    /// surfaced as job failures.
    pub fn wait_for_session(&self, control: &JobControl) -> bool {
        // A fixed session count means the pool size alone governs
        // admission; trust it instead of burning a probe per job
        if self.fixed {
            return !control.is_stopped();
        }
        loop {
            if control.is_stopped() {
                return false;
            }
            if self.session_available_now() {
                return true;
            }
            debug!("NVENC session busy, backing off");
            thread::sleep(SESSION_RETRY_BACKOFF);
        }
    }

    /// Probe with the job's actual encoder arguments. A failure here is
    /// an advisory (the GPU/driver may still cope with real input), so
    /// callers warn and proceed.
    pub fn params_supported(&self, params: &JobParams) -> bool {
        if self.fixed {
            return true;
        }
        let mut cmd = Command::new(&self.paths.ffmpeg);
        cmd.args([
            "-y",
            "-hide_banner",
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=1:size=640x360:rate=30",
            "-c:v",
        ]);
        cmd.arg(params.codec.encoder_name());
        for arg in &params.video_args {
            cmd.arg(arg);
        }
        cmd.arg("-f").arg("null").arg(null_sink());
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        match cmd.status() {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("NVENC parameter probe could not run: {e}");
                false
            }
        }
    }

    /// One disposable synthetic encode through the hardware encoder
    fn probe_encode_once(&self, timeout: Duration) -> bool {
        let mut cmd = self.probe_command("h264_nvenc");
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn NVENC probe: {e}");
                return false;
            }
        };

        // Bounded wait: a hung driver should read as "not usable"
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return status.success(),
                Ok(None) => {
                    if std::time::Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return false;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return false,
            }
        }
    }

    /// Launch k probes simultaneously; true only if every one succeeds
    fn probe_concurrent(&self, k: u32) -> bool {
        let handles: Vec<_> = (0..k)
            .map(|_| {
                let paths = self.paths.clone();
                thread::spawn(move || {
                    let prober = NvencProber::new(paths);
                    prober.probe_encode_once(Duration::from_secs(30))
                })
            })
            .collect();
        handles
            .into_iter()
            .all(|h| h.join().unwrap_or(false))
    }

    fn probe_command(&self, encoder: &str) -> Command {
        let mut cmd = Command::new(&self.paths.ffmpeg);
        cmd.args([
            "-y",
            "-hide_banner",
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=1:size=640x360:rate=30",
            "-c:v",
        ]);
        cmd.arg(encoder);
        cmd.arg("-f").arg("null").arg(null_sink());
        cmd
    }

    fn listing_contains(&self, flag: &str, needle: &str) -> bool {
        let output = Command::new(&self.paths.ffmpeg)
            .arg("-hide_banner")
            .arg(flag)
            .output();
        match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).contains(needle)
            }
            _ => false,
        }
    }
}

/// Iteratively raise k until a batch of concurrent probes fails or the
/// ceiling is reached; the last fully-successful k is the maximum.
/// Extracted so the search is testable without hardware.
pub fn discover_with<F: FnMut(u32) -> bool>(mut probe_k: F, ceiling: u32) -> u32 {
    let mut best = 0;
    for k in 1..=ceiling {
        if probe_k(k) {
            best = k;
        } else {
            break;
        }
    }
    best
}

/// True if the codec family must pass NVENC admission before running
pub fn needs_admission(codec: CodecFamily) -> bool {
    codec.is_nvenc()
}

fn null_sink() -> &'static Path {
    if cfg!(windows) {
        Path::new("NUL")
    } else {
        Path::new("/dev/null")
    }
}
