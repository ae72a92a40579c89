// Parser for the engine's stderr status lines (key=value tokens)

/// Incremental parser for the engine's one-line status reports.
/// Tokens (`bitrate=`, `size=`, `time=`, `speed=`) appear anywhere in a
/// line, independently and intermittently; a token that fails to parse
/// is skipped without disturbing the others.
#[derive(Debug, Default, Clone)]
pub struct StatusParser {
    pub bitrate_kbps: Option<f64>,
    pub size_kb: Option<u64>,
    pub time_s: Option<f64>,
    pub speed: Option<f64>,
}

impl StatusParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line of engine output. Returns true if any field was
    /// updated (callers only fire a progress callback on real updates).
    pub fn parse_line(&mut self, line: &str) -> bool {
        let mut updated = false;

        if let Some(value) = token_value(line, "bitrate=") {
            // Format "1234.5kbits/s"
            if let Ok(b) = value.trim_end_matches("kbits/s").parse::<f64>() {
                self.bitrate_kbps = Some(b);
                updated = true;
            }
        }

        if let Some(value) = token_value(line, "size=") {
            // Format "   10240kB" (padding already trimmed)
            if let Ok(kb) = value.trim_end_matches("kB").trim().parse::<u64>() {
                self.size_kb = Some(kb);
                updated = true;
            }
        }

        if let Some(value) = token_value(line, "time=") {
            if let Some(secs) = parse_clock(value) {
                self.time_s = Some(secs);
                updated = true;
            }
        }

        if let Some(value) = token_value(line, "speed=") {
            // Format "1.02x"
            if let Ok(s) = value.trim_end_matches('x').parse::<f64>() {
                self.speed = Some(s);
                updated = true;
            }
        }

        updated
    }
}

/// Find `key` anywhere in the line and return the whitespace-delimited
/// value after it. The engine pads some values with spaces after the
/// '=' ("size=   10240kB"), so leading whitespace is consumed first.
fn token_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let value = &rest[..end];
    if value.is_empty() { None } else { Some(value) }
}

/// Parse "HH:MM:SS.cc" into seconds
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours = parts.next()?.parse::<f64>().ok()?;
    let minutes = parts.next()?.parse::<f64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Progress fraction for the given pass. Pass 1 covers 0.0..0.5 of a
/// 2-pass job and pass 2 covers 0.5..1.0; the equal split is an
/// approximation carried over from the original scheduler.
pub fn progress_fraction(time_s: f64, duration_s: f64, pass_index: u32, passes: u32) -> f64 {
    if duration_s <= 0.0 {
        return 0.0;
    }
    let base = (time_s / duration_s) / passes as f64;
    let offset = if pass_index == 1 { 0.5 } else { 0.0 };
    (offset + base).min(1.0)
}

/// Remaining wall-clock estimate. On pass 1 of a 2-pass job the
/// effective total is `duration * passes`; afterwards just `duration`.
pub fn time_left(
    time_s: f64,
    duration_s: f64,
    pass_index: u32,
    passes: u32,
    speed: f64,
) -> Option<f64> {
    if speed <= 0.0 {
        return None;
    }
    let effective = if passes == 2 && pass_index == 0 {
        duration_s * passes as f64
    } else {
        duration_s
    };
    Some(((effective - time_s).max(0.0)) / speed)
}
