use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rollcall::{config, GalleryStore, MatchResult, Pipeline, Recognizer};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(
    version,
    about = "Attendance by face - gallery maintenance and probe identification"
)]
struct Cli {
    /// Config file (defaults to the installed location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the face gallery from the photo directory
    Rebuild {
        /// Photo directory (defaults to photo_dir from config)
        #[arg(short, long)]
        photos: Option<PathBuf>,
    },
    /// Identify the face in an image against the gallery
    Identify {
        /// Image file, or `-` to read an image or data URL from stdin
        image: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List identities in the gallery
    List,
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
        Commands::Rebuild { photos } => {
            let dir = photos.unwrap_or_else(|| cfg.photo_dir.clone());
            rebuild(&cfg, &dir)
        }
        Commands::Identify { image, json } => identify(&cfg, &image, json),
        Commands::List => list(&cfg),
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn recognizer(cfg: &config::Config) -> Result<Recognizer<Pipeline>> {
    let pipeline = Pipeline::new(
        &cfg.detector_model,
        &cfg.recognizer_model,
        cfg.pipeline_options(),
    )
    .context("Failed to initialize face recognition pipeline")?;
    Ok(Recognizer::new(
        GalleryStore::new(&cfg.gallery_path),
        pipeline,
        cfg.threshold,
    ))
}

fn rebuild(cfg: &config::Config, dir: &Path) -> Result<()> {
    info!("Rebuilding gallery from {}", dir.display());

    let recognizer = recognizer(cfg)?;
    let failures = recognizer
        .rebuild_gallery(dir)
        .context("Failed to rebuild gallery")?;
    let gallery = recognizer.gallery()?;

    if failures.is_empty() {
        info!("✓ Gallery rebuilt with {} identities", gallery.len());
    } else {
        warn!(
            "Gallery rebuilt with {} identities; no face found in: {}",
            gallery.len(),
            failures.join(", ")
        );
    }
    Ok(())
}

fn identify(cfg: &config::Config, image: &str, json: bool) -> Result<()> {
    let bytes = if image == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading probe from stdin")?;
        buf
    } else {
        std::fs::read(image).with_context(|| format!("reading {}", image))?
    };

    let recognizer = recognizer(cfg)?;
    let result = recognizer.identify_bytes(&bytes)?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    match result {
        MatchResult::NoGalleryData => warn!("No faces registered. Run 'rebuild' first."),
        MatchResult::NoFaceDetected => warn!("No face detected in probe"),
        MatchResult::Match { identity, distance } => info!(
            "✓ {} (distance {:.3}, threshold {:.3})",
            identity, distance, cfg.threshold
        ),
        MatchResult::Unknown { distance } => info!(
            "Unknown face (closest distance {:.3}, threshold {:.3})",
            distance, cfg.threshold
        ),
    }
    Ok(())
}

fn list(cfg: &config::Config) -> Result<()> {
    let gallery = GalleryStore::new(&cfg.gallery_path)
        .load()
        .context("Failed to load gallery")?;

    info!("{} identities in {}", gallery.len(), cfg.gallery_path.display());
    for identity in gallery.identities() {
        println!("{}", identity);
    }
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
