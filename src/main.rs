//! objflow - Lazy object extraction for 5D images.
//!
//! This binary loads frame stacks, wires the extraction graph and prints the
//! region-feature report.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use objflow::{
    capability::{default_search_dirs, probe_solver},
    config::{CheckConfig, Cli, Command, ExtractConfig},
    error::LoadError,
    graph::{ArraySource, AxisTag, ElementKind, ListRoi, Meta},
    imageio::{load_inputs, write_overlay_frames, FRAME_AXES},
    objects::{Feature, ObjectExtraction},
    report::FeatureReport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Extract(config) => run_extract(config).await,
        Command::Check(config) => run_check(config),
    }
}

// =============================================================================
// Extract Command
// =============================================================================

async fn run_extract(config: ExtractConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match extract(&config).await {
        Ok(report) => {
            let json = if config.pretty {
                serde_json::to_string_pretty(&report)
            } else {
                serde_json::to_string(&report)
            };
            match json {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Failed to serialize report: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            error!("Extraction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn extract(config: &ExtractConfig) -> Result<FeatureReport, LoadError> {
    let raw_paths = config.raw.clone();
    let binary_paths = config.binary.clone();
    let (raw, binary) = tokio::task::spawn_blocking(move || load_inputs(&raw_paths, &binary_paths))
        .await
        .map_err(|e| LoadError::Decode {
            path: "<frames>".to_string(),
            message: e.to_string(),
        })??;
    let frames = raw.shape()[0];
    info!(frames, shape = ?raw.shape(), "loaded input stacks");

    let raw = ArraySource::new("RawImage", raw, FRAME_AXES)?;
    let binary = ArraySource::new("BinaryImage", binary, FRAME_AXES)?;
    let background = config.background_labels();

    let extraction = ObjectExtraction::with_cache_capacity(&config.features, config.cache_blocks)?;
    extraction.raw_image.connect(raw.output())?;
    extraction.binary_image.connect(binary.output())?;
    extraction.background_labels.set_value(
        background.clone(),
        Meta::list(background.len(), AxisTag::C, ElementKind::U8),
    )?;

    let times = if config.times.is_empty() {
        ListRoi::all()
    } else {
        ListRoi::new(config.times.clone())
    };
    let map = extraction.region_features.request(times).await?;
    let report = FeatureReport::from_time_map(frames, &map);
    info!(
        cells = report.features.len(),
        objects = report.object_count(),
        "extracted region features"
    );

    if let Some(ref dir) = config.overlay_dir {
        write_overlay(&extraction, dir).await?;
    }

    let stats = extraction.feature_cache_stats();
    info!(hits = stats.hits, misses = stats.misses, "feature cache");

    Ok(report)
}

async fn write_overlay(
    extraction: &Arc<ObjectExtraction>,
    dir: &std::path::Path,
) -> Result<(), LoadError> {
    let meta = extraction.object_center_image.require_meta()?;
    let overlay = extraction
        .object_center_image
        .request(meta.full_region())
        .await?;
    let written = write_overlay_frames(&overlay, dir, "centers")?;
    info!(frames = written.len(), dir = %dir.display(), "wrote center overlay");
    Ok(())
}

// =============================================================================
// Check Command
// =============================================================================

fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("objflow capability check");
    println!("════════════════════════");
    println!();

    println!("Supported features:");
    for feature in Feature::ALL {
        println!("  {:<16} {} column(s)", feature.name(), feature.columns());
    }
    println!();

    let mut dirs = config.solver_path.clone();
    dirs.extend(default_search_dirs());
    let capability = probe_solver(&dirs);
    if capability.is_available() {
        println!("✓ Solver: {}", capability);
    } else {
        warn!("solver wrapper unavailable");
        println!("✗ Solver: {}", capability);
        for dir in &dirs {
            println!("    searched {}", dir.display());
        }
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose { "objflow=debug" } else { "objflow=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
