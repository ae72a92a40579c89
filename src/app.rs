use crate::cli::{Cli, Commands};
use anyhow::{bail, Context, Result};
use ffqueue::config::Config;
use ffqueue::engine::{
    self, CodecFamily, Dispatcher, Job, JobKind, JobParams, NvencProber, Outcome, StatusSink, Trim,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

pub fn run(cli: Cli) {
    match cli.command {
        Commands::CheckFfmpeg => handle_check_ffmpeg(),
        Commands::Probe { file } => handle_probe(file),
        Commands::DiscoverNvenc => handle_discover_nvenc(),
        Commands::Encode {
            input,
            output,
            codec,
            two_pass,
            trim_start,
            trim_duration,
        } => handle_encode(input, output, codec, two_pass, trim_start, trim_duration),
        Commands::Watch {
            folder,
            output,
            codec,
        } => handle_watch(folder, output, codec),
        Commands::InitConfig => handle_init_config(),
    }
}

fn handle_check_ffmpeg() {
    let config = Config::load().unwrap_or_default();
    match engine::probe::engine_version(&config.engine) {
        Ok(version) => {
            println!("ffmpeg found: {}", version);
            match engine::probe::ffprobe_version(&config.engine) {
                Ok(probe_version) => {
                    println!("ffprobe found: {}", probe_version);
                }
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn handle_probe(file: PathBuf) {
    let config = Config::load().unwrap_or_default();
    match engine::probe::probe_duration(&config.engine, &file) {
        Ok(duration) => {
            println!("{}: {:.2}s", file.display(), duration);
        }
        Err(e) => {
            eprintln!("Error probing {}: {:#}", file.display(), e);
            process::exit(1);
        }
    }
}

fn handle_discover_nvenc() {
    let config = Config::load().unwrap_or_default();
    let prober = NvencProber::new(config.engine);
    let cap = prober.capability();

    println!(
        "NVENC encoder:   {}",
        if cap.encoder_ok { "ok" } else { "unavailable" }
    );
    println!(
        "CUVID decoder:   {}",
        if cap.decoder_ok { "ok" } else { "unavailable" }
    );
    println!(
        "CUDA scaling:    {}",
        if cap.scale_ok { "ok" } else { "unavailable" }
    );
    println!("Max sessions:    {}", cap.max_sessions);

    if !cap.encoder_ok {
        process::exit(1);
    }
}

fn handle_encode(
    input: PathBuf,
    output: PathBuf,
    codec: String,
    two_pass: bool,
    trim_start: Option<f64>,
    trim_duration: Option<f64>,
) {
    if let Err(e) = encode(input, output, codec, two_pass, trim_start, trim_duration) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn encode(
    input: PathBuf,
    output: PathBuf,
    codec: String,
    two_pass: bool,
    trim_start: Option<f64>,
    trim_duration: Option<f64>,
) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let mut params = build_params(&config, &codec)?;
    params.two_pass = two_pass;
    if let (Some(start_s), Some(duration_s)) = (trim_start, trim_duration) {
        params.trim = Some(Trim {
            start_s,
            duration_s,
        });
    }

    let job = if input.is_dir() {
        Arc::new(Job::new(input, output, params).with_kind(JobKind::Folder))
    } else {
        let duration = engine::probe::probe_duration(&config.engine, &input)
            .with_context(|| format!("Failed to probe {}", input.display()))?;
        Arc::new(Job::new(input, output, params).with_duration(duration))
    };

    let prober = Arc::new(build_prober(&config));
    let dispatcher = Dispatcher::new(config, prober, Arc::new(ConsoleSink));
    dispatcher.submit(job);
    dispatcher.wait_idle();
    dispatcher.shutdown();
    Ok(())
}

fn handle_watch(folder: PathBuf, output: PathBuf, codec: String) {
    if let Err(e) = watch(folder, output, codec) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn watch(folder: PathBuf, output: PathBuf, codec: String) -> Result<()> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }
    let config = Config::load().unwrap_or_default();
    let params = build_params(&config, &codec)?;

    let prober = Arc::new(build_prober(&config));
    let dispatcher = Dispatcher::new(config, prober, Arc::new(ConsoleSink));
    dispatcher.submit(Arc::new(
        Job::new(folder.clone(), output, params).with_kind(JobKind::WatchFolder),
    ));
    println!("Watching {} (ctrl-c to stop)", folder.display());

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

fn handle_init_config() {
    match Config::config_path() {
        Ok(path) => {
            if Config::exists() {
                println!("Config file exists: {}", path.display());
            } else {
                match Config::ensure_default() {
                    Ok(()) => println!("Created default config: {}", path.display()),
                    Err(e) => {
                        eprintln!("Error creating config: {:#}", e);
                        process::exit(1);
                    }
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn build_prober(config: &Config) -> NvencProber {
    let configured = config.parallelism.nvenc_workers;
    if configured > 0 {
        NvencProber::with_fixed_sessions(config.engine.clone(), configured)
    } else {
        NvencProber::new(config.engine.clone())
    }
}

fn build_params(config: &Config, codec: &str) -> Result<JobParams> {
    let family = parse_codec(codec)?;
    let mut params = JobParams::new(family, &config.defaults.container);
    if !config.defaults.video_args.is_empty() {
        params.video_args = shlex::split(&config.defaults.video_args)
            .context("Failed to parse configured video args")?;
    }
    if !config.defaults.audio_args.is_empty() {
        params.audio_args = shlex::split(&config.defaults.audio_args)
            .context("Failed to parse configured audio args")?;
    }
    Ok(params)
}

fn parse_codec(name: &str) -> Result<CodecFamily> {
    match name.to_lowercase().as_str() {
        "x264" | "h264" => Ok(CodecFamily::X264),
        "x265" | "hevc" => Ok(CodecFamily::X265),
        "vp9" => Ok(CodecFamily::Vp9),
        "nvenc-h264" | "h264_nvenc" => Ok(CodecFamily::NvencH264),
        "nvenc-hevc" | "hevc_nvenc" => Ok(CodecFamily::NvencHevc),
        "copy" => Ok(CodecFamily::Copy),
        other => bail!(
            "Unknown codec '{}' (expected x264, x265, vp9, nvenc-h264, nvenc-hevc, or copy)",
            other
        ),
    }
}

/// Prints job transitions and a progress line per status update
struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn on_progress(&self, job: &Job) {
        let status = job.status();
        let speed = status.speed.map(|s| format!("{s:.1}x")).unwrap_or_default();
        let eta = status
            .time_left_s
            .map(|t| format!(" eta {}s", t.round() as u64))
            .unwrap_or_default();
        eprint!(
            "\r{}: {:.1}% {}{}    ",
            job.input_path.display(),
            status.progress * 100.0,
            speed,
            eta
        );
    }

    fn on_terminal(&self, job: &Job, outcome: Outcome) {
        match outcome {
            Outcome::Finished => eprintln!("\n{}: done", job.input_path.display()),
            Outcome::Stopped => eprintln!("\n{}: stopped", job.input_path.display()),
            Outcome::Failed => {
                let error = job.status().error.unwrap_or_else(|| "unknown".to_string());
                eprintln!("\n{}: failed: {}", job.input_path.display(), error);
            }
        }
    }

    fn on_advisory(&self, job: &Job, message: &str) {
        eprintln!("{}: warning: {}", job.input_path.display(), message);
    }
}
