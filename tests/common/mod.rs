// Shared fixture: a fake engine pair (ffmpeg + ffprobe) built as shell
// scripts, so the integration tests run hermetically on any machine.
//
// The fake ffmpeg appends its argument list to a log file, emits status
// lines in the real engine's key=value format, and creates its output
// file. The fake ffprobe reports the duration stored as the media
// file's text content.

#![allow(dead_code)]

use ffqueue::config::EnginePaths;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct FakeEngine {
    pub dir: TempDir,
    pub paths: EnginePaths,
    log_path: PathBuf,
    slow_marker: PathBuf,
}

impl FakeEngine {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let log_path = dir.path().join("engine.log");
        let slow_marker = dir.path().join("slow");

        let ffmpeg = dir.path().join("ffmpeg");
        let ffprobe = dir.path().join("ffprobe");

        let ffmpeg_script = format!(
            r#"#!/bin/sh
log="{log}"
slow="{slow}"
printf '%s\n' "$*" >> "$log"
last=
for a in "$@"; do last="$a"; done
if [ -f "$slow" ]; then
    i=1
    while [ -f "$slow" ] && [ $i -lt 600 ]; do
        s=$((i / 10))
        printf 'frame= %d fps= 25 size= %dkB time=00:%02d:%02d.%d0 bitrate= 1200.0kbits/s speed=1.0x\n' \
            "$i" $((i * 16)) $((s / 60)) $((s % 60)) $((i % 10)) >&2
        sleep 0.1
        i=$((i+1))
    done
else
    echo "frame= 250 fps= 50 size=    1024kB time=00:00:10.00 bitrate= 1200.0kbits/s speed=2.0x" >&2
    echo "frame= 500 fps= 50 size=    2048kB time=00:00:50.00 bitrate= 1150.0kbits/s speed=2.0x" >&2
fi
case "$last" in
    /dev/null) : ;;
    *) printf 'encoded' > "$last" ;;
esac
exit 0
"#,
            log = log_path.display(),
            slow = slow_marker.display(),
        );

        let ffprobe_script = r#"#!/bin/sh
last=
for a in "$@"; do last="$a"; done
d=$(cat "$last" 2>/dev/null)
[ -n "$d" ] || d=100.0
printf '{"format": {"duration": "%s"}}' "$d"
exit 0
"#;

        write_executable(&ffmpeg, &ffmpeg_script);
        write_executable(&ffprobe, ffprobe_script);

        let paths = EnginePaths {
            ffmpeg: ffmpeg.clone(),
            ffprobe: ffprobe.clone(),
        };
        Self {
            dir,
            paths,
            log_path,
            slow_marker,
        }
    }

    /// Every recorded engine invocation, one line per call
    pub fn log(&self) -> Vec<String> {
        match fs::read_to_string(&self.log_path) {
            Ok(body) => body.lines().map(String::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn encode_lines(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| line.contains("-c:v") || line.contains("-vn"))
            .collect()
    }

    /// Make every encode emit a status line every 100ms until the
    /// marker is cleared (or a minute passes)
    pub fn set_slow(&self) {
        fs::write(&self.slow_marker, b"1").unwrap();
    }

    /// Let slow encodes run to completion on their next tick
    pub fn clear_slow(&self) {
        let _ = fs::remove_file(&self.slow_marker);
    }

    /// Write a fake media file whose probed duration is `duration`
    pub fn media(&self, name: &str, duration: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, duration).unwrap();
        path
    }
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }
}
