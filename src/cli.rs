use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffqueue")]
#[command(about = "Concurrent encode-queue manager for FFMPEG", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check if ffmpeg and ffprobe are installed
    CheckFfmpeg,

    /// Probe a video file to get its duration
    Probe {
        /// Path to the video file
        file: PathBuf,
    },

    /// Probe NVENC availability and discover the concurrent session limit
    DiscoverNvenc,

    /// Encode a file, or every video file in a folder
    Encode {
        /// Input file or directory
        input: PathBuf,

        /// Output file (for a file input) or output directory (for a folder)
        output: PathBuf,

        /// Video codec
        #[arg(long, default_value = "x264")]
        codec: String,

        /// Run a two-pass encode
        #[arg(long)]
        two_pass: bool,

        /// Trim: start offset in seconds
        #[arg(long, requires = "trim_duration")]
        trim_start: Option<f64>,

        /// Trim: duration in seconds
        #[arg(long, requires = "trim_start")]
        trim_duration: Option<f64>,
    },

    /// Monitor a folder and encode each new file once it stops growing
    Watch {
        /// Directory to monitor
        folder: PathBuf,

        /// Directory encoded files are written to
        output: PathBuf,

        /// Video codec
        #[arg(long, default_value = "x264")]
        codec: String,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}
