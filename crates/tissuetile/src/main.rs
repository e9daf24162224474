//! tissuetile: CLI for sampling tissue tiles from a slide image.
//!
//! Loads an image into an in-memory pyramid, builds the foreground mask,
//! samples the tile grid and prints what was accepted. With `--save`,
//! tile images and an XML overlay session are written next to the
//! image (or under `--output`).
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin tissuetile -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Set `RUST_LOG=debug` to see stage rebuilds, the estimated threshold
//! and scan statistics.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Parser, ValueEnum};
use log::info;
use serde::Serialize;
use tissuetile_io::{
    DefaultRoot, ExportOptions, ExportSummary, FixedRoot, OutputPathChooser, TileFormat,
    export_session, resolve_root,
};
use tissuetile_pipeline::config::{DEFAULT_FRACTION, DEFAULT_WINDOW};
use tissuetile_pipeline::source::DEFAULT_LEVEL_FACTOR;
use tissuetile_pipeline::threshold::ProcessingSize;
use tissuetile_pipeline::{
    Dimensions, ExtractionParams, IntermediateResult, MemoryPyramid, NeverCancel, PyramidSource,
    Rect, RunReport, SampleOutcome, TileExtraction,
};

/// Sample tissue tiles from a large image and export them as regions of
/// interest.
///
/// Size, spacing and offsets default to values derived from the image:
/// eight grid cells across the narrowest axis, tiles a tenth of the
/// spacing, the first tile half a spacing in.
#[derive(Parser)]
#[command(name = "tissuetile", version)]
struct Cli {
    /// Path to the input image (TIFF, PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Tile side in pixels.
    #[arg(long)]
    size: Option<u32>,

    /// Distance between tile origins in pixels.
    #[arg(long)]
    spacing: Option<u32>,

    /// Horizontal offset of the first column.
    #[arg(long)]
    offset_x: Option<u32>,

    /// Vertical offset of the first row.
    #[arg(long)]
    offset_y: Option<u32>,

    /// Morphology window size (1-10).
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: u32,

    /// Minimum foreground score for a tile to be kept (0-1).
    #[arg(long, default_value_t = DEFAULT_FRACTION)]
    threshold: f64,

    /// Channel used for tissue detection (0 = red, 1 = green, 2 = blue).
    #[arg(long, default_value_t = tissuetile_pipeline::channel::DEFAULT_CHANNEL)]
    channel: usize,

    /// Pyramid level tiles are saved at.
    #[arg(long, default_value_t = 0)]
    resolution: usize,

    /// Save tile images and the session document.
    #[arg(long)]
    save: bool,

    /// File name root for saved artifacts (defaults to the image path
    /// without its extension).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Tile image format.
    #[arg(long, value_enum, default_value_t = Format::Tiff)]
    format: Format,

    /// Down-sampling factor between pyramid levels.
    #[arg(long, default_value_t = DEFAULT_LEVEL_FACTOR, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    level_factor: u32,

    /// Maximum number of pyramid levels.
    #[arg(long, default_value_t = 4, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    max_levels: usize,

    /// Scanner magnification of the full-resolution image (e.g. 40).
    #[arg(long)]
    magnification: Option<f64>,

    /// Intermediate result written by `--preview`.
    #[arg(long, value_enum, default_value_t = Intermediate::Mask)]
    intermediate: Intermediate,

    /// Write the selected intermediate result to this PNG file.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Output the run summary as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full extraction parameters as a JSON string.
    ///
    /// When provided, all other extraction parameter flags are ignored.
    /// The JSON must be a valid `ExtractionParams` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Tile image format selection.
#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Uncompressed TIFF.
    Tiff,
    /// PNG.
    Png,
}

/// Intermediate result selection.
#[derive(Clone, Copy, ValueEnum)]
enum Intermediate {
    /// Unprocessed source image.
    Raw,
    /// Final foreground mask.
    Mask,
    /// Thresholded channel before morphology.
    Threshold,
    /// Selected channel before thresholding.
    Channel,
}

impl From<Intermediate> for IntermediateResult {
    fn from(value: Intermediate) -> Self {
        match value {
            Intermediate::Raw => Self::Raw,
            Intermediate::Mask => Self::Mask,
            Intermediate::Threshold => Self::Threshold,
            Intermediate::Channel => Self::Channel,
        }
    }
}

/// Build [`ExtractionParams`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, flags override
/// the image-derived defaults.
fn params_from_cli(cli: &Cli, defaults: &ExtractionParams) -> Result<ExtractionParams, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ExtractionParams {
        size: cli.size.unwrap_or(defaults.size),
        spacing: cli.spacing.unwrap_or(defaults.spacing),
        offset_x: cli.offset_x.unwrap_or(defaults.offset_x),
        offset_y: cli.offset_y.unwrap_or(defaults.offset_y),
        window: cli.window,
        threshold: cli.threshold,
        resolution: cli.resolution,
        save: cli.save,
        intermediate: cli.intermediate.into(),
        channel: cli.channel,
    })
}

/// Machine-readable run summary for `--json`.
#[derive(Serialize)]
struct RunSummary<'a> {
    image: &'a str,
    dimensions: Dimensions,
    levels: usize,
    intensity_threshold: Option<u8>,
    params: &'a ExtractionParams,
    scored: usize,
    accepted: usize,
    regions: Vec<RegionSummary>,
    saved_tiles: usize,
    session: Option<PathBuf>,
}

#[derive(Serialize)]
struct RegionSummary {
    label: String,
    rect: Rect,
    score: f64,
}

fn load_source(cli: &Cli) -> Result<Rc<dyn PyramidSource>, String> {
    let bytes = std::fs::read(&cli.image_path)
        .map_err(|e| format!("Error reading {}: {e}", cli.image_path.display()))?;
    let identifier = cli.image_path.to_string_lossy().into_owned();
    let pyramid = MemoryPyramid::from_bytes(identifier, &bytes, cli.level_factor, cli.max_levels)
        .map_err(|e| format!("Error loading {}: {e}", cli.image_path.display()))?;
    Ok(match cli.magnification {
        Some(m) => Rc::new(pyramid.with_magnification(m)),
        None => Rc::new(pyramid),
    })
}

fn write_preview(
    extraction: &TileExtraction,
    params: &ExtractionParams,
    path: &Path,
) -> Result<(), String> {
    let dims = extraction.dimensions();
    let output = ProcessingSize::for_dimensions(dims).dimensions;
    let rendered = extraction
        .render_intermediate(params.intermediate, Rect::full(dims), output)
        .map_err(|e| format!("Error rendering preview: {e}"))?;
    rendered
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| format!("Error writing preview to {}: {e}", path.display()))?;
    info!("preview written to {}", path.display());
    Ok(())
}

fn export(
    cli: &Cli,
    extraction: &TileExtraction,
    params: &ExtractionParams,
) -> Result<Option<ExportSummary>, String> {
    let mut chooser: Box<dyn OutputPathChooser> = match cli.output {
        Some(ref root) => Box::new(FixedRoot(root.clone())),
        None => Box::new(DefaultRoot),
    };
    let Some(root) = resolve_root(chooser.as_mut(), extraction.source().identifier()) else {
        return Ok(None);
    };
    let options = ExportOptions {
        root,
        resolution: params.resolution,
        format: match cli.format {
            Format::Tiff => TileFormat::Tiff,
            Format::Png => TileFormat::Png,
        },
    };
    export_session(extraction, extraction.records(), &options, &NeverCancel)
        .map(Some)
        .map_err(|e| format!("Export error: {e}"))
}

fn print_report(
    extraction: &TileExtraction,
    params: &ExtractionParams,
    outcome: &SampleOutcome,
    export: Option<&ExportSummary>,
) {
    let dims = extraction.dimensions();
    println!(
        "{}: {}x{} px, {} levels",
        extraction.source().identifier(),
        dims.width,
        dims.height,
        extraction.mapper().level_count(),
    );
    if let Some(t) = extraction.estimated_threshold(params.channel) {
        println!("intensity threshold (channel {}): {t}", params.channel);
    }
    println!(
        "grid: size {} spacing {} offset ({}, {})",
        params.size, params.spacing, params.offset_x, params.offset_y
    );
    println!(
        "accepted {} of {} tiles",
        outcome.records.len(),
        outcome.scored
    );
    for record in &outcome.records {
        let r = record.tile.rect;
        println!(
            "  {:<12} x={:<6} y={:<6} score={:.3}",
            record.label, r.x, r.y, record.tile.score
        );
    }
    if let Some(summary) = export {
        println!(
            "saved {} tiles at {} ({} on the image edge)",
            summary.tiles.len(),
            extraction.resolution_label(params.resolution),
            summary.skipped,
        );
        if let Some(ref session) = summary.session {
            println!("session: {}", session.display());
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let source = match load_source(&cli) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let mut extraction = match TileExtraction::new(source) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let params = match params_from_cli(&cli, &extraction.default_params()) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match extraction.run(&params, &NeverCancel) {
        Ok(RunReport::Sampled(outcome)) => outcome,
        Ok(RunReport::Unchanged) => SampleOutcome {
            records: extraction.records().to_vec(),
            ..SampleOutcome::default()
        },
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref path) = cli.preview
        && let Err(msg) = write_preview(&extraction, &params, path)
    {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    let exported = if params.save {
        match export(&cli, &extraction, &params) {
            Ok(summary) => summary,
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    if cli.json {
        let summary = RunSummary {
            image: extraction.source().identifier(),
            dimensions: extraction.dimensions(),
            levels: extraction.mapper().level_count(),
            intensity_threshold: extraction.estimated_threshold(params.channel),
            params: &params,
            scored: outcome.scored,
            accepted: outcome.records.len(),
            regions: outcome
                .records
                .iter()
                .map(|r| RegionSummary {
                    label: r.label.clone(),
                    rect: r.tile.rect,
                    score: r.tile.score,
                })
                .collect(),
            saved_tiles: exported.as_ref().map_or(0, |s| s.tiles.len()),
            session: exported.as_ref().and_then(|s| s.session.clone()),
        };
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing summary: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&extraction, &params, &outcome, exported.as_ref());
    }

    ExitCode::SUCCESS
}
