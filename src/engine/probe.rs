// Input probing via ffprobe and cropdetect

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

use crate::config::EnginePaths;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

/// Check that the encode engine is runnable and return its version line
pub fn engine_version(paths: &EnginePaths) -> Result<String> {
    let output = Command::new(&paths.ffmpeg)
        .arg("-version")
        .output()
        .with_context(|| {
            format!(
                "Failed to execute {}. Is ffmpeg installed and in PATH?",
                paths.ffmpeg.display()
            )
        })?;

    if !output.status.success() {
        anyhow::bail!("ffmpeg command failed with status: {}", output.status);
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

/// Check that ffprobe is runnable and return its version line
pub fn ffprobe_version(paths: &EnginePaths) -> Result<String> {
    let output = Command::new(&paths.ffprobe)
        .arg("-version")
        .output()
        .with_context(|| {
            format!(
                "Failed to execute {}. Is ffprobe installed and in PATH?",
                paths.ffprobe.display()
            )
        })?;

    if !output.status.success() {
        anyhow::bail!("ffprobe command failed with status: {}", output.status);
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let first_line = version_output.lines().next().unwrap_or("Unknown version");

    Ok(first_line.to_string())
}

/// Probe a video file to get its duration in seconds
pub fn probe_duration(paths: &EnginePaths, path: &Path) -> Result<f64> {
    let output = Command::new(&paths.ffprobe)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .context("Failed to execute ffprobe")?;

    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    parse_duration_json(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the duration out of ffprobe's -show_format JSON
pub fn parse_duration_json(json: &str) -> Result<f64> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON output")?;

    let duration_str = probe
        .format
        .duration
        .context("No duration found in ffprobe output")?;

    duration_str
        .parse::<f64>()
        .context("Failed to parse duration as float")
}

/// Detected crop rectangle, as the engine's crop filter expects it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropValues {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl CropValues {
    pub fn filter_arg(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }
}

/// Run a short cropdetect pass over the first seconds of the input and
/// return the last crop the filter settled on, if any
pub fn detect_crop(paths: &EnginePaths, path: &Path) -> Result<Option<CropValues>> {
    let output = Command::new(&paths.ffmpeg)
        .args(["-hide_banner", "-ss", "0", "-t", "10", "-i"])
        .arg(path)
        .args(["-vf", "cropdetect", "-f", "null", "-"])
        .output()
        .context("Failed to execute ffmpeg for crop detection")?;

    // cropdetect reports on stderr whether or not the run "succeeds"
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(parse_cropdetect_output(&stderr))
}

/// Extract the last `crop=W:H:X:Y` suggestion from cropdetect output
pub fn parse_cropdetect_output(stderr: &str) -> Option<CropValues> {
    let mut last = None;
    for line in stderr.lines() {
        if let Some(idx) = line.find("crop=") {
            let suggestion = line[idx + 5..]
                .split_whitespace()
                .next()
                .unwrap_or_default();
            let mut nums = suggestion.split(':').filter_map(|n| n.parse::<u32>().ok());
            if let (Some(width), Some(height), Some(x), Some(y)) =
                (nums.next(), nums.next(), nums.next(), nums.next())
            {
                last = Some(CropValues {
                    width,
                    height,
                    x,
                    y,
                });
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_json() {
        let json = r#"{
            "format": {
                "filename": "test.mp4",
                "duration": "123.456",
                "size": "1024000"
            }
        }"#;
        let duration = parse_duration_json(json).expect("Failed to parse duration");
        assert_eq!(duration, 123.456);
    }

    #[test]
    fn test_parse_duration_json_integer() {
        let json = r#"{"format": {"duration": "60"}}"#;
        assert_eq!(parse_duration_json(json).unwrap(), 60.0);
    }

    #[test]
    fn test_parse_duration_json_missing() {
        let json = r#"{"format": {}}"#;
        assert!(parse_duration_json(json).is_err());
    }

    #[test]
    fn test_parse_cropdetect_takes_last() {
        let stderr = "\
[Parsed_cropdetect_0 @ 0x55] x1:0 x2:1919 y1:138 y2:941 w:1920 h:800 x:0 y:140 pts:1 t:0.04 crop=1920:800:0:138\n\
[Parsed_cropdetect_0 @ 0x55] x1:0 x2:1919 y1:140 y2:939 w:1920 h:800 x:0 y:140 pts:2 t:0.08 crop=1920:800:0:140\n";
        let crop = parse_cropdetect_output(stderr).expect("crop expected");
        assert_eq!(
            crop,
            CropValues {
                width: 1920,
                height: 800,
                x: 0,
                y: 140
            }
        );
        assert_eq!(crop.filter_arg(), "crop=1920:800:0:140");
    }

    #[test]
    fn test_parse_cropdetect_no_match() {
        assert!(parse_cropdetect_output("frame=1 fps=0.0\n").is_none());
    }
}
