//! wmark CLI Tool
//!
//! Command-line interface for overlaying video and image watermarks onto
//! host videos.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wmark_compositor::{FrameCompositor, ScaledWatermark, WatermarkCache};
use wmark_core::timing::cycle_duration;
use wmark_core::{
    CompositionConfig, CyclingSchedule, Dimensions, FixedSchedule, GeometryResolver,
    PositionScheduler, WatermarkMode,
};
use wmark_encoder::asset_loader::watermark_mode_for;
use wmark_encoder::{
    load_watermark, probe_host, probe_watermark, ComposeOptions, ComposeReport, Compositor,
    DecodedFrame, Demuxed, EncoderProfile, VideoCodec, VideoReader,
};

#[derive(Parser)]
#[command(name = "wmark")]
#[command(about = "Overlay animated or static watermarks onto videos")]
#[command(version)]
struct Cli {
    /// JSON file with composition and encoder settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watermark a single video
    Compose {
        /// Host video file path
        host: PathBuf,

        /// Watermark video or image path
        watermark: PathBuf,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Watermark several videos with the same watermark
    Batch {
        /// Watermark video or image path
        watermark: PathBuf,

        /// Host video file paths
        #[arg(required = true)]
        hosts: Vec<PathBuf>,

        /// Directory for the watermarked videos
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Number of concurrent sessions (defaults to the CPU count)
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Show host metadata and, given a watermark, where it would be placed
    Probe {
        /// Host video file path
        host: PathBuf,

        /// Watermark video or image path
        #[arg(short, long)]
        watermark: Option<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Render one watermarked frame to an image
    Preview {
        /// Host video file path
        host: PathBuf,

        /// Watermark video or image path
        watermark: PathBuf,

        /// Output image path (PNG)
        #[arg(short, long)]
        output: PathBuf,

        /// Host timestamp in seconds
        #[arg(long, default_value = "0")]
        at: f64,

        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Print the effective settings as JSON
    Config {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// Overrides applied on top of the config file
#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Opacity of video watermarks (0.0 - 1.0)
    #[arg(long)]
    opacity: Option<f64>,

    /// Scale of video watermarks relative to the host
    #[arg(long)]
    scale: Option<f64>,

    /// Opacity of image watermarks (0.0 - 1.0)
    #[arg(long)]
    static_opacity: Option<f64>,

    /// Width of image watermarks as a fraction of the host width
    #[arg(long)]
    static_scale: Option<f64>,

    /// Output video codec
    #[arg(long, value_enum)]
    codec: Option<CodecChoice>,

    /// x264 preset
    #[arg(long)]
    preset: Option<String>,

    /// x264 constant rate factor
    #[arg(long)]
    crf: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CodecChoice {
    H264,
    Mpeg4,
}

impl From<CodecChoice> for VideoCodec {
    fn from(choice: CodecChoice) -> Self {
        match choice {
            CodecChoice::H264 => VideoCodec::H264,
            CodecChoice::Mpeg4 => VideoCodec::Mpeg4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct EncoderSettings {
    codec: CodecChoice,
    preset: String,
    crf: u8,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        let profile = EncoderProfile::default();
        Self {
            codec: CodecChoice::H264,
            preset: profile.preset,
            crf: profile.crf,
        }
    }
}

/// Contents of a `--config` file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    composition: CompositionConfig,
    encoder: EncoderSettings,
}

impl Settings {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply(mut self, args: &SettingsArgs) -> Self {
        let c = &mut self.composition;
        if let Some(v) = args.opacity {
            c.opacity = v;
        }
        if let Some(v) = args.scale {
            c.scale = v;
        }
        if let Some(v) = args.static_opacity {
            c.static_opacity = v;
        }
        if let Some(v) = args.static_scale {
            c.static_scale = v;
        }
        let e = &mut self.encoder;
        if let Some(v) = args.codec {
            e.codec = v;
        }
        if let Some(v) = &args.preset {
            e.preset = v.clone();
        }
        if let Some(v) = args.crf {
            e.crf = v;
        }
        self
    }

    fn compose_options(&self) -> ComposeOptions {
        let profile = EncoderProfile {
            codec: self.encoder.codec.into(),
            ..EncoderProfile::default()
        }
        .with_preset(self.encoder.preset.clone())
        .with_crf(self.encoder.crf);
        ComposeOptions::default()
            .with_config(self.composition)
            .with_profile(profile)
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "wmark=info",
        1 => "wmark=debug",
        _ => "wmark=trace",
    };
    let env_filter = EnvFilter::from_default_env().add_directive(level.parse().context("Invalid log directive")?);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(env_filter)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let file_settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Compose {
            host,
            watermark,
            output,
            settings,
        } => compose_video(&host, &watermark, &output, &file_settings.apply(&settings))?,

        Commands::Batch {
            watermark,
            hosts,
            output_dir,
            jobs,
            settings,
        } => batch_compose(&watermark, &hosts, &output_dir, jobs, &file_settings.apply(&settings))?,

        Commands::Probe {
            host,
            watermark,
            json,
            settings,
        } => probe(&host, watermark.as_deref(), json, &file_settings.apply(&settings))?,

        Commands::Preview {
            host,
            watermark,
            output,
            at,
            settings,
        } => preview(&host, &watermark, &output, at, &file_settings.apply(&settings))?,

        Commands::Config { settings } => {
            let effective = file_settings.apply(&settings);
            println!("{}", serde_json::to_string_pretty(&effective)?);
        }
    }

    Ok(())
}

fn compose_video(host: &Path, watermark: &Path, output: &Path, settings: &Settings) -> Result<()> {
    println!("Watermarking: {}", host.display());
    println!("Watermark: {}", watermark.display());
    println!("Output: {}", output.display());

    let report = Compositor::new(settings.compose_options())
        .compose(host, watermark, output)
        .with_context(|| format!("Failed to watermark {}", host.display()))?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &ComposeReport) {
    println!("\n=== Result ===");
    println!("Mode: {}", report.mode);
    println!("Watermark size: {}", report.watermark_size);
    println!("Frames written: {}", report.frames);
    let audio = match (report.audio_copied, report.audio_transcoded) {
        (false, _) => "no",
        (true, false) => "copied",
        (true, true) => "re-encoded to AAC",
    };
    println!("Audio: {audio}");
    println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    if report.mode == WatermarkMode::Animated {
        println!("Anchor changes:");
        for change in report.anchor_changes.iter().take(10) {
            println!("  {:>8.2}s  {}", change.at, change.anchor);
        }
        if report.anchor_changes.len() > 10 {
            println!("  ... {} more", report.anchor_changes.len() - 10);
        }
    }
    println!("\nSuccessfully wrote {}", report.output.display());
}

/// Output path for `host` inside `output_dir`: `<stem>_watermarked.<ext>`
fn batch_output_path(host: &Path, output_dir: &Path) -> PathBuf {
    let stem = host
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = host
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    output_dir.join(format!("{stem}_watermarked.{ext}"))
}

fn batch_compose(
    watermark: &Path,
    hosts: &[PathBuf],
    output_dir: &Path,
    jobs: Option<usize>,
    settings: &Settings,
) -> Result<()> {
    std::fs::create_dir_all(output_dir).context("Failed to create output directory")?;

    let jobs = jobs.unwrap_or_else(num_cpus::get).clamp(1, hosts.len().max(1));
    println!("Watermarking {} videos with {} jobs", hosts.len(), jobs);

    let cache = Arc::new(WatermarkCache::new());
    let compositor = Compositor::new(settings.compose_options()).with_cache(Arc::clone(&cache));
    let next = AtomicUsize::new(0);
    let failures = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for _ in 0..jobs {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(host) = hosts.get(index) else {
                    break;
                };
                let output = batch_output_path(host, output_dir);
                match compositor.compose(host, watermark, &output) {
                    Ok(report) => info!(
                        host = %host.display(),
                        output = %report.output.display(),
                        frames = report.frames,
                        "Finished"
                    ),
                    Err(e) => {
                        error!(host = %host.display(), error = %e, "Failed");
                        failures
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .push((host.clone(), e));
                    }
                }
            });
        }
    });

    let failures = failures.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    println!(
        "Completed {}/{} videos ({} prepared watermark{})",
        hosts.len() - failures.len(),
        hosts.len(),
        cache.len(),
        if cache.len() == 1 { "" } else { "s" }
    );
    for (host, e) in &failures {
        println!("  {}: {}", host.display(), e);
    }
    if !failures.is_empty() {
        bail!("{} of {} videos failed", failures.len(), hosts.len());
    }
    Ok(())
}

fn probe(host: &Path, watermark: Option<&Path>, json: bool, settings: &Settings) -> Result<()> {
    let host_info = probe_host(host).with_context(|| format!("Failed to probe {}", host.display()))?;

    let mut report = serde_json::json!({
        "host": {
            "path": host.display().to_string(),
            "dimensions": host_info.dimensions,
            "duration": host_info.duration,
            "frame_rate": format!("{}/{}", host_info.frame_rate.0, host_info.frame_rate.1),
            "fps": host_info.fps(),
            "has_audio": host_info.has_audio,
        }
    });

    if let Some(watermark) = watermark {
        let wm = probe_watermark(watermark)
            .with_context(|| format!("Failed to probe {}", watermark.display()))?;
        let config = &settings.composition;
        let scale = config.scale_for(wm.mode);
        let size = GeometryResolver::new(wm.mode, scale)
            .resolve(host_info.dimensions, wm.dimensions)
            .context("Watermark cannot be placed on this host")?;

        let cycle = cycle_duration(wm.duration, host_info.duration);
        let placements = placement_timeline(wm.mode, host_info.dimensions, host_info.duration, scale, cycle, size);

        report["watermark"] = serde_json::json!({
            "path": watermark.display().to_string(),
            "mode": wm.mode,
            "dimensions": wm.dimensions,
            "duration": wm.duration,
            "frame_count": wm.frame_count,
            "scaled": size,
            "opacity": config.opacity_for(wm.mode),
            "cycle": cycle,
            "placements": placements
                .iter()
                .map(|p| serde_json::json!({ "at": p.0, "anchor": p.1, "x": p.2, "y": p.3 }))
                .collect::<Vec<_>>(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Host ===");
    println!("Path: {}", host.display());
    println!("Resolution: {}", host_info.dimensions);
    println!(
        "Frame rate: {}/{} ({:.2} fps)",
        host_info.frame_rate.0,
        host_info.frame_rate.1,
        host_info.fps()
    );
    println!("Duration: {:.2} seconds", host_info.duration);
    println!("Audio: {}", if host_info.has_audio { "yes" } else { "no" });

    if let Some(wm) = report.get("watermark") {
        println!("\n=== Watermark ===");
        println!("Mode: {}", wm["mode"].as_str().unwrap_or("?"));
        println!("Native size: {}x{}", wm["dimensions"]["width"], wm["dimensions"]["height"]);
        println!("Scaled size: {}x{}", wm["scaled"]["width"], wm["scaled"]["height"]);
        println!("Frames: {}", wm["frame_count"]);
        println!("Duration: {:.2} seconds", wm["duration"].as_f64().unwrap_or(0.0));
        println!("Opacity: {:.2}", wm["opacity"].as_f64().unwrap_or(0.0));

        println!("\n=== Placements (first 10) ===");
        if let Some(placements) = wm["placements"].as_array() {
            for p in placements.iter().take(10) {
                println!(
                    "  {:>8.2}s  {:<13} ({}, {})",
                    p["at"].as_f64().unwrap_or(0.0),
                    p["anchor"].as_str().unwrap_or("?"),
                    p["x"],
                    p["y"]
                );
            }
            if placements.len() > 10 {
                println!("  ... {} more", placements.len() - 10);
            }
        }
    }

    Ok(())
}

/// Anchor hops over the host duration as `(time, anchor, x, y)`
fn placement_timeline(
    mode: WatermarkMode,
    host: Dimensions,
    host_duration: f64,
    scale: f64,
    cycle: f64,
    size: Dimensions,
) -> Vec<(f64, &'static str, i64, i64)> {
    let schedule: Box<dyn PositionScheduler> = match mode {
        WatermarkMode::Animated => Box::new(CyclingSchedule::new(host, scale, cycle)),
        WatermarkMode::Static => Box::new(FixedSchedule::new(host)),
    };

    let mut times = vec![0.0];
    if mode == WatermarkMode::Animated && cycle > 0.0 {
        let mut t = cycle;
        while t < host_duration {
            times.push(t);
            t += cycle;
        }
    }

    times
        .into_iter()
        .map(|t| {
            let (x, y) = schedule.offset_at(t, size).to_pixels();
            (t, schedule.anchor_at(t).name(), x, y)
        })
        .collect()
}

fn preview(host: &Path, watermark: &Path, output: &Path, at: f64, settings: &Settings) -> Result<()> {
    let mut reader = VideoReader::open(host).with_context(|| format!("Failed to open {}", host.display()))?;
    let host_dims = reader.dimensions();
    let host_duration = reader.duration_secs();

    // Latest frame at or before `at`, or the first frame.
    let mut chosen: Option<DecodedFrame> = None;
    reader
        .demux(|item| {
            if let Demuxed::Frame(frame) = item {
                if chosen.is_none() || frame.seconds <= at {
                    chosen = Some(frame);
                }
            }
            Ok(())
        })
        .context("Failed to decode host video")?;
    let mut frame = chosen.context("Host video has no frames")?;

    let mode = watermark_mode_for(watermark);
    let config = &settings.composition;
    let asset = load_watermark(watermark).with_context(|| format!("Failed to load {}", watermark.display()))?;
    let prepared = ScaledWatermark::prepare(&asset, host_dims, config.scale_for(mode))
        .context("Failed to prepare watermark")?;
    let compositor = FrameCompositor::new(Arc::new(prepared), host_dims, host_duration, config);

    let placement = compositor
        .composite(&mut frame.image, frame.seconds)
        .context("Failed to composite frame")?;
    frame.image.save(output).context("Failed to save frame")?;

    println!(
        "Frame at {:.2}s: {} at ({}, {}), watermark frame {}",
        frame.seconds, placement.anchor, placement.x, placement.y, placement.frame_index
    );
    println!("Saved preview to {}", output.display());
    Ok(())
}
