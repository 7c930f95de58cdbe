use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use simple_slideshow::config::{Configuration, DisplayMode, Overrides};
use simple_slideshow::playlist::Playlist;
use simple_slideshow::processing::layout::WindowGeometry;
use simple_slideshow::tasks::{files, viewer};

#[derive(Debug, Parser)]
#[command(
    name = "slideshow",
    version,
    about = "Crossfading slideshow that places each image away from recent ones"
)]
struct Args {
    /// Image folders; replace the configured list when given
    #[arg(value_name = "FOLDER")]
    folders: Vec<PathBuf>,
    /// Path to YAML config
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
    /// Scan folders recursively
    #[arg(short = 'r', long = "recursive")]
    recursive: bool,
    /// Shuffle the image list before the show starts
    #[arg(short = 's', long = "shuffle")]
    shuffle: bool,
    /// Seconds before the next image
    #[arg(short = 't', long = "timeout", value_name = "SECONDS")]
    timeout: Option<f64>,
    /// Window geometry as WxH+X+Y; implies windowed mode
    #[arg(short = 'g', long = "geometry", value_name = "SPEC", value_parser = WindowGeometry::parse)]
    geometry: Option<WindowGeometry>,
    /// Hide window title and border
    #[arg(short = 'b', long = "borderless")]
    borderless: bool,
    /// Comma-separated image extensions to scan
    #[arg(short = 'f', long = "format", value_name = "EXTS", value_delimiter = ',')]
    formats: Option<Vec<String>>,
    /// fullscreen, span or windowed
    #[arg(long = "display", value_name = "MODE", value_parser = parse_display)]
    display: Option<DisplayMode>,
    /// Deterministic RNG seed for shuffling and placement
    #[arg(long = "seed", value_name = "SEED")]
    seed: Option<u64>,
    /// Print the next N playlist entries without opening a window
    #[arg(long = "dry-run", value_name = "N")]
    dry_run: Option<usize>,
    /// More logging; repeat for trace
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn overrides(&self) -> Result<Overrides> {
        let interval = match self.timeout {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => bail!("--timeout must be a positive number of seconds, got {secs}"),
            None => None,
        };
        Ok(Overrides {
            folders: self.folders.clone(),
            recursive: self.recursive,
            shuffle: self.shuffle.then_some(true),
            interval,
            geometry: self.geometry,
            borderless: self.borderless,
            extensions: self.formats.clone(),
            display: self.display,
            seed: self.seed,
        })
    }
}

fn parse_display(s: &str) -> Result<DisplayMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "fullscreen" => Ok(DisplayMode::Fullscreen),
        "span" => Ok(DisplayMode::Span),
        "windowed" => Ok(DisplayMode::Windowed),
        other => bail!("unknown display mode {other:?}; expected fullscreen, span or windowed"),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default},wgpu_core=warn,wgpu_hal=warn,naga=warn,winit=warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = match args.config.as_ref() {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    let cfg = cfg
        .with_overrides(args.overrides()?)
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("effective configuration:\n{:#?}", cfg);

    let extensions = cfg.extensions();
    let images = files::discover_images(&cfg.folders, &extensions, cfg.recursive);
    if images.is_empty() {
        tracing::warn!(?extensions, "no images found in configured folders");
    }
    let playlist = match cfg.seed {
        Some(seed) => Playlist::with_seed(images, cfg.shuffle, seed),
        None => Playlist::new(images, cfg.shuffle),
    };

    if let Some(count) = args.dry_run {
        for (i, path) in playlist.peek_order(count).iter().enumerate() {
            println!("{:>4}  {}", i + 1, path.display());
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    viewer::run(cfg, playlist, cancel)
}
