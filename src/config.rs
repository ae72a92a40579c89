// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::engine::job::CodecFamily;

/// Paths to the encode engine binaries. Both default to bare names so
/// the system PATH resolves them; tests and portable installs point
/// them somewhere explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginePaths {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for EnginePaths {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EnginePaths,

    #[serde(default)]
    pub parallelism: ParallelismConfig,

    #[serde(default)]
    pub folders: FolderConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelismConfig {
    /// Whether encodes may run concurrently at all. Off means one job
    /// at a time through the standard queue.
    #[serde(default)]
    pub enabled: bool,

    /// Worker count for the shared parallel queue
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Route jobs to one queue per codec family instead of the shared
    /// parallel queue. Only honored when `enabled` is set.
    #[serde(default)]
    pub per_codec: bool,

    /// Worker counts per codec family in per-codec mode, keyed by the
    /// codec's config name ("x264", "nvenc-hevc", ...); families not
    /// listed fall back to `workers`
    #[serde(default)]
    pub per_codec_workers: HashMap<String, u32>,

    /// Whether NVENC jobs get their own queue sized to the GPU session
    /// limit. Off means they wait in line like everything else.
    #[serde(default)]
    pub concurrent_nvenc: bool,

    /// NVENC worker count; 0 discovers the session ceiling by probing
    #[serde(default)]
    pub nvenc_workers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Descend into subdirectories when expanding a folder job
    #[serde(default = "default_true_config")]
    pub recursive: bool,

    /// Run crop detection on each discovered file before submitting it
    #[serde(default)]
    pub auto_crop: bool,

    /// Seconds between watch-folder polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: u64,

    /// Hold watch-folder arrivals until every encode queue has drained
    #[serde(default = "default_true_config")]
    pub wait_for_other_tasks: bool,

    /// Let arrivals from different watch folders encode concurrently
    /// instead of serializing through one at a time
    #[serde(default)]
    pub concurrent_watchfolders: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Output container extension for new jobs
    #[serde(default = "default_container")]
    pub container: String,

    /// Directory for chunk intermediates; system temp when unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Extra video-side engine arguments, shell-style quoted
    #[serde(default)]
    pub video_args: String,

    /// Extra audio-side engine arguments, shell-style quoted
    #[serde(default)]
    pub audio_args: String,
}

fn default_workers() -> u32 {
    2
}

fn default_true_config() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    10
}

fn default_container() -> String {
    "mkv".to_string()
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: default_workers(),
            per_codec: false,
            per_codec_workers: HashMap::new(),
            concurrent_nvenc: false,
            nvenc_workers: 0, // 0 = discover by probing
        }
    }
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            auto_crop: false,
            poll_interval_s: default_poll_interval(),
            wait_for_other_tasks: true,
            concurrent_watchfolders: false,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            temp_dir: None, // std::env::temp_dir at use time
            video_args: String::new(),
            audio_args: String::new(),
        }
    }
}

impl ParallelismConfig {
    /// Worker count for one codec family's queue in per-codec mode
    pub fn workers_for(&self, codec: CodecFamily) -> u32 {
        self.per_codec_workers
            .get(codec.key())
            .copied()
            .unwrap_or(self.workers)
            .max(1)
    }
}

impl DefaultsConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("ffqueue")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("ffqueue")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            let config: Config = toml::from_str(&contents).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?;

            Ok(config)
        } else {
            let config = Config::default();

            // Best effort: a read-only config directory is not fatal
            if let Err(e) = config.save() {
                eprintln!("Warning: Could not create default config file: {}", e);
                eprintln!(
                    "Using built-in defaults. Run 'ffqueue init-config' to create a config file."
                );
            }

            Ok(config)
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    /// Create a default config file if it doesn't exist
    pub fn ensure_default() -> Result<()> {
        if !Self::exists() {
            let config = Config::default();
            config.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.parallelism.enabled, false);
        assert_eq!(config.parallelism.workers, 2);
        assert_eq!(config.parallelism.nvenc_workers, 0);
        assert_eq!(config.folders.recursive, true);
        assert_eq!(config.folders.poll_interval_s, 10);
        assert_eq!(config.folders.wait_for_other_tasks, true);
        assert_eq!(config.defaults.container, "mkv");
        assert_eq!(config.engine.ffmpeg, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.parallelism.enabled = true;
        config
            .parallelism
            .per_codec_workers
            .insert("x265".to_string(), 3);

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.parallelism.enabled, true);
        assert_eq!(deserialized.parallelism.workers_for(CodecFamily::X265), 3);
        // Unlisted families fall back to the shared worker count
        assert_eq!(deserialized.parallelism.workers_for(CodecFamily::X264), 2);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[parallelism]\nenabled = true\n").unwrap();
        assert_eq!(config.parallelism.enabled, true);
        assert_eq!(config.parallelism.workers, 2);
        assert_eq!(config.defaults.container, "mkv");
    }

    #[test]
    fn test_workers_for_floor_of_one() {
        let mut config = ParallelismConfig::default();
        config.workers = 0;
        assert_eq!(config.workers_for(CodecFamily::Vp9), 1);
    }
}
