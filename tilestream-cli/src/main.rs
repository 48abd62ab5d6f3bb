//! Tilestream CLI - demo driver for the tile streaming engine.
//!
//! Streams a panning viewport against an HTTP or on-disk tile source and
//! logs cache behavior step by step. With `--seed`, synthetic vector tiles
//! covering the pan path are written to the tile directory first, so the
//! demo runs fully offline.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tilestream::config::EngineConfig;
use tilestream::coord::{CoordError, TileKey, Viewport};
use tilestream::decode::{DecoderKind, VectorTileWriter};
use tilestream::element::{MapElement, Tag};
use tilestream::engine::TileEngine;
use tilestream::source::{SourceConfig, SourceError};

#[derive(Debug, Error)]
enum CliError {
    #[error("either --tiles-dir or --url must be given")]
    NoSource,

    #[error("--seed requires --tiles-dir")]
    SeedWithoutDir,

    #[error("invalid center tile: {0}")]
    Coord(#[from] CoordError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload format served by the source.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Compact varint-encoded vector tiles
    Vector,
    /// GeoJSON feature collections
    Geojson,
    /// Bitmap tiles (PNG, JPEG)
    Raster,
}

impl From<Format> for DecoderKind {
    fn from(format: Format) -> Self {
        match format {
            Format::Vector => DecoderKind::Vector,
            Format::Geojson => DecoderKind::GeoJson,
            Format::Raster => DecoderKind::Raster,
        }
    }
}

/// Stream map tiles for a panning viewport and report cache behavior.
#[derive(Debug, Parser)]
#[command(name = "tilestream", version, about)]
struct Cli {
    /// Directory holding tiles as z/x/y.stv
    #[arg(long)]
    tiles_dir: Option<PathBuf>,

    /// HTTP tile URL template containing {z}, {x} and {y}
    #[arg(long, conflicts_with = "tiles_dir")]
    url: Option<String>,

    /// Write synthetic vector tiles covering the pan path first
    #[arg(long)]
    seed: bool,

    /// Payload format of the source
    #[arg(long, value_enum, default_value_t = Format::Vector)]
    format: Format,

    /// Zoom level of the viewport
    #[arg(long, default_value_t = 14)]
    zoom: u8,

    /// Starting center tile column
    #[arg(long, default_value_t = 8800)]
    x: u32,

    /// Starting center tile row
    #[arg(long, default_value_t = 5373)]
    y: u32,

    /// Viewport size in pixels (square)
    #[arg(long, default_value_t = 768)]
    viewport_px: u32,

    /// Number of one-tile eastward pan steps
    #[arg(long, default_value_t = 8)]
    steps: u32,

    /// Number of load workers (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Cache capacity in tiles
    #[arg(long, default_value_t = 256)]
    capacity: usize,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let sources = match (&cli.tiles_dir, &cli.url) {
        (Some(dir), _) => SourceConfig::directory(dir.clone(), "stv"),
        (None, Some(url)) => SourceConfig::http(url.clone()),
        (None, None) => return Err(CliError::NoSource),
    };

    let start = TileKey::new(cli.x, cli.y, cli.zoom)?;
    if cli.seed {
        let dir = cli.tiles_dir.as_deref().ok_or(CliError::SeedWithoutDir)?;
        seed_pan_path(dir, start, cli.steps, cli.viewport_px).await?;
    }

    let mut config = EngineConfig::default().with_cache_capacity(cli.capacity);
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }

    let decoder = DecoderKind::from(cli.format).build();
    let mut engine = TileEngine::start(config, &sources, decoder)?;

    let extent = TileKey::extent(cli.zoom);
    for step in 0..=cli.steps {
        let center = TileKey::new((cli.x + step) % extent, cli.y, cli.zoom)?;
        let viewport = Viewport::new(center, cli.viewport_px, cli.viewport_px);

        let required = engine.update_viewport(viewport);
        settle(&mut engine, &required).await;

        let stats = engine.stats();
        let visible_ready = required
            .iter()
            .filter(|k| engine.lookup(**k).is_some())
            .count();
        info!(
            step,
            center = %center,
            jobs_enqueued = stats.manager.jobs_enqueued,
            visible_ready,
            required = required.len(),
            ready = stats.manager.ready,
            loading = stats.manager.loading,
            failed = stats.manager.failed,
            evicted = stats.manager.evicted,
            stale_dropped = stats.manager.stale_dropped,
            "pan step"
        );
    }

    engine.shutdown().await;
    Ok(())
}

/// Drains completions until every visible tile has settled or a deadline
/// passes (tiles may legitimately fail when the source is missing them).
async fn settle(engine: &mut TileEngine, required: &[TileKey]) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        engine.drain_completions();
        let pending = required.iter().any(|k| {
            engine.lookup(*k).is_none()
                && engine
                    .tile(*k)
                    .is_some_and(|t| t.state() == tilestream::manager::TileState::Loading)
        });
        if !pending || Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Writes synthetic vector tiles for every tile the pan path will need.
async fn seed_pan_path(
    root: &std::path::Path,
    start: TileKey,
    steps: u32,
    viewport_px: u32,
) -> Result<(), CliError> {
    let extent = TileKey::extent(start.zoom());
    let mut seeded = 0usize;
    for step in 0..=steps {
        let center = TileKey::new((start.x() + step) % extent, start.y(), start.zoom())?;
        let viewport = Viewport::new(center, viewport_px, viewport_px);
        for key in viewport.required_keys(256) {
            let dir = root
                .join(key.zoom().to_string())
                .join(key.x().to_string());
            let path = dir.join(format!("{}.stv", key.y()));
            if tokio::fs::try_exists(&path).await? {
                continue;
            }
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, synthetic_tile(key)).await?;
            seeded += 1;
        }
    }
    info!(seeded, root = %root.display(), "seeded synthetic tiles");
    Ok(())
}

/// One diagonal line plus a labeled point, enough to see content flow.
fn synthetic_tile(key: TileKey) -> Vec<u8> {
    let mut writer = VectorTileWriter::new();

    let mut line = MapElement::new();
    line.start_line();
    line.add_point(0.0, 0.0);
    line.add_point(256.0, 256.0);
    line.tags.push(Tag::new("kind", "diagonal"));
    writer.add(&line);

    let mut label = MapElement::new();
    label.start_points();
    label.add_point(128.0, 128.0);
    label.tags.push(Tag::new("name", key.to_string()));
    writer.add(&label);

    writer.finish()
}
