use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use trinket::{captures, config, TryOn};

#[derive(Parser)]
#[command(name = "trinket")]
#[command(version, about = "Virtual jewellery try-on: overlay accessories below a detected face")]
struct Cli {
    /// Config file (defaults to the system-wide location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overlay the selected accessory on an image file
    Process {
        /// Input image (any format the image crate decodes)
        #[arg(short, long)]
        input: PathBuf,
        /// Output image; the format follows the extension
        #[arg(short, long)]
        output: PathBuf,
        /// Accessory id to wear (defaults to the first in the catalog)
        #[arg(long)]
        item: Option<String>,
        /// Also store the result in the captures directory
        #[arg(long)]
        capture: bool,
    },
    /// List catalog accessories
    List,
    /// Process camera frames and store the last one as a capture
    #[cfg(feature = "camera")]
    Live {
        /// Number of frames to process
        #[arg(short, long, default_value_t = 30)]
        frames: usize,
        /// Accessory id to start with
        #[arg(long)]
        item: Option<String>,
        /// Switch to the next accessory every N frames (0 = never)
        #[arg(long, default_value_t = 0)]
        cycle_every: usize,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Process {
            input,
            output,
            item,
            capture,
        } => process(&cfg, &input, &output, item.as_deref(), capture),
        Commands::List => list(&cfg),
        #[cfg(feature = "camera")]
        Commands::Live {
            frames,
            item,
            cycle_every,
        } => live(&cfg, frames, item.as_deref(), cycle_every),
        Commands::Config => open_config(cli.config),
    }
}

fn process(
    cfg: &config::Config,
    input: &std::path::Path,
    output: &std::path::Path,
    item: Option<&str>,
    capture: bool,
) -> Result<()> {
    let tryon = TryOn::from_config(cfg)?;
    if let Some(id) = item {
        tryon.select(id)?;
    }

    let raw = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let frame = tryon
        .process(&raw)
        .with_context(|| format!("processing {}", input.display()))?;

    frame
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(
        "✓ {} wearing `{}` written to {}",
        input.display(),
        tryon.catalog.current_id(),
        output.display()
    );

    if capture {
        let path = captures::save_capture(&cfg.captures, &frame)?;
        info!("Capture stored at {}", path.display());
    }
    Ok(())
}

fn list(cfg: &config::Config) -> Result<()> {
    let catalog = trinket::Catalog::load(&cfg.catalog)
        .with_context(|| format!("loading catalog {}", cfg.catalog.display()))?;
    let current = catalog.current_id();
    for item in catalog.ids() {
        let marker = if item == current { "*" } else { " " };
        println!("{} {}", marker, item);
    }
    Ok(())
}

#[cfg(feature = "camera")]
fn live(cfg: &config::Config, frames: usize, item: Option<&str>, cycle_every: usize) -> Result<()> {
    use trinket_vision::Camera;

    let tryon = TryOn::from_config(cfg)?;
    if let Some(id) = item {
        tryon.select(id)?;
    }

    info!("Opening camera: {}", cfg.camera);
    let mut camera = Camera::open(&cfg.camera).context("Failed to open camera")?;

    let mut last = None;
    for i in 0..frames {
        if cycle_every > 0 && i > 0 && i % cycle_every == 0 {
            info!("Switched to `{}`", tryon.next());
        }

        let frame = camera.frame().context("Failed to capture frame")?;
        let img = image::DynamicImage::ImageRgb8(frame);
        match tryon.pipeline.process_image(&img, &tryon.catalog) {
            Ok(processed) => last = Some(processed),
            Err(e) => log::warn!("Frame {}: {}", i + 1, e),
        }
    }

    match last {
        Some(frame) => {
            let path = captures::save_capture(&cfg.captures, &frame)?;
            info!("✓ Capture stored at {}", path.display());
            Ok(())
        }
        None => anyhow::bail!("No frame could be processed"),
    }
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(&config_path))
            .context("Failed to write default config")?;
    }

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
