use animcap::sink::{FrameSink, FsSink, GifOptions, GifSink, GifskiOptions, GifskiSink};
use animcap::{CaptureConfig, LogCollector};
use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum GifEncoder {
    /// External `gifski` binary
    Gifski,
    /// In-process encoder, no external tools
    Builtin,
}

/// Capture a web animation frame by frame with headless Chrome.
#[derive(Parser, Debug)]
#[command(name = "animcap", version, about)]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page to capture
    #[arg(long)]
    url: Option<String>,

    /// CSS selector of the element to screenshot
    #[arg(long)]
    selector: Option<String>,

    /// Screenshot with a transparent background
    #[arg(long)]
    omit_background: bool,

    /// Animation length in milliseconds
    #[arg(long)]
    duration: Option<f64>,

    #[arg(long)]
    fps: Option<f64>,

    /// Animation time to skip before the first frame, in milliseconds
    #[arg(long)]
    delay: Option<f64>,

    /// Playback rate between captures (default 30 / fps)
    #[arg(long)]
    speed: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Page load timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Write numbered PNG frames into this directory
    #[arg(long, conflicts_with = "gif")]
    out_dir: Option<PathBuf>,

    /// Encode frames into this GIF
    #[arg(long)]
    gif: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = GifEncoder::Gifski)]
    gif_encoder: GifEncoder,

    /// gifski: 1-100, higher is better. builtin: palette sampling 1 (best) to 30 (fastest)
    #[arg(long, requires = "gif")]
    gif_quality: Option<u8>,

    /// Play the GIF once instead of looping
    #[arg(long, requires = "gif")]
    gif_once: bool,

    /// Faster, lower quality gifski encoding
    #[arg(long, requires = "gif")]
    gif_fast: bool,

    /// Keep intermediate GIF frames
    #[arg(long, requires = "gif")]
    keep_frames: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Collect logs and write them as a JSON array to this file ("-" for stdout)
    #[arg(long)]
    log_json: Option<PathBuf>,
}

impl Cli {
    fn capture_config(&self) -> animcap::Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::from_file(path)?,
            None => CaptureConfig::default(),
        };

        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(selector) = &self.selector {
            config.target.selector = selector.clone();
        }
        if self.omit_background {
            config.target.omit_background = true;
        }
        if let Some(duration) = self.duration {
            config.duration_ms = duration;
        }
        if self.fps.is_some() {
            config.fps = self.fps;
        }
        if self.delay.is_some() {
            config.delay_ms = self.delay;
        }
        if self.speed.is_some() {
            config.speed = self.speed;
        }
        if let Some(width) = self.width {
            config.viewport.width = width;
        }
        if let Some(height) = self.height {
            config.viewport.height = height;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    fn sink(&self, config: &CaptureConfig) -> Box<dyn FrameSink> {
        match (&self.gif, self.gif_encoder) {
            (Some(path), GifEncoder::Gifski) => {
                let mut options = GifskiOptions::new(path);
                options.fps = Some(config.effective_fps());
                options.quality = self.gif_quality;
                options.once = self.gif_once;
                options.fast = self.gif_fast;
                options.keep_frames = self.keep_frames;
                Box::new(GifskiSink::new(options))
            }
            (Some(path), GifEncoder::Builtin) => {
                let mut options = GifOptions::new(path);
                options.fps = Some(config.effective_fps());
                options.quality = self.gif_quality.map(i32::from);
                options.repeat = !self.gif_once;
                options.keep_frames = self.keep_frames;
                Box::new(GifSink::new(options))
            }
            (None, _) => {
                let dir = self.out_dir.clone().unwrap_or_else(|| PathBuf::from("./screenshots"));
                Box::new(FsSink::new(dir))
            }
        }
    }
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the logger. With `--log-json` records are collected instead of
/// printed, and the returned collector holds them.
fn init_logging(cli: &Cli) -> animcap::Result<Option<LogCollector>> {
    let level = log_level(cli.verbose);
    if cli.log_json.is_some() {
        let collector = LogCollector::new(level);
        collector.install()?;
        return Ok(Some(collector));
    }
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
    Ok(None)
}

fn write_logs(path: &Path, collector: &LogCollector) {
    let json = match collector.to_json() {
        Ok(json) => json,
        Err(e) => {
            eprintln!("failed to serialize logs: {}", e);
            return;
        }
    };
    if path.as_os_str() == "-" {
        println!("{}", json);
    } else if let Err(e) = std::fs::write(path, json) {
        eprintln!("failed to write logs to '{}': {}", path.display(), e);
    }
}

async fn run(cli: &Cli) -> i32 {
    let config = match cli.capture_config() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return 2;
        }
    };

    let mut sink = cli.sink(&config);
    match animcap::capture_animation(config, &mut sink).await {
        Ok(report) => {
            info!(
                "captured {}/{} frames",
                report.frames_written, report.total_frames
            );
            0
        }
        Err(e) => {
            error!("capture failed: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let collector = match init_logging(&cli) {
        Ok(collector) => collector,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let code = run(&cli).await;

    if let (Some(path), Some(collector)) = (&cli.log_json, &collector) {
        write_logs(path, collector);
    }
    std::process::exit(code);
}
