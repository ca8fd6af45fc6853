// src/main.rs

mod config;
mod correlation_filter;
mod dataset;
mod detector;
mod features;
mod filter_bank;
mod imaging;
mod model_store;
mod normalisation;
mod preprocessing;
mod types;
mod visualize;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detector::DetectorParams;
use filter_bank::FilterBank;
use imaging::MultiChannelImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use types::{Config, Detection};

/// Traffic sign detection and recognition with a filter bank of correlation filters
#[derive(Parser, Debug)]
#[command(name = "tsr", version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: String,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train one correlation filter detector per sign class
    Train {
        /// Dataset root with one sub-directory per class (overrides dataset.root)
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Where to write the trained filter bank
        #[arg(short, long, default_value = "models/filter_bank.json")]
        output: PathBuf,

        /// mosse or mccf (overrides training.algorithm)
        #[arg(long)]
        algorithm: Option<String>,

        /// no_op, hsi, rgb_hsi, igo or igo_hsi (overrides training.features)
        #[arg(long)]
        features: Option<String>,
    },

    /// Detect signs in images or directories of images
    Detect {
        #[arg(short, long)]
        model: PathBuf,

        /// Image files or directories
        #[arg(short, long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Write annotated copies of every input here
        #[arg(long)]
        annotate_dir: Option<PathBuf>,

        /// Also write every class response map into the annotate dir
        #[arg(long, requires = "annotate_dir")]
        response_maps: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rank sign classes for a cropped sign
    Classify {
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        input: PathBuf,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a summary of every detector in a model
    Inspect {
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Write spatial filter, frequency filter and Gaussian response images
    Render {
        #[arg(short, long)]
        model: PathBuf,

        /// Output directory (overrides output.output_dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

fn init_logging(level: &str, verbose: u8) {
    let default = match verbose {
        0 => format!("{}={}", env!("CARGO_CRATE_NAME"), level),
        1 => format!("{}=debug", env!("CARGO_CRATE_NAME")),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries results (`--json`), logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = Path::new(&cli.config).exists();
    let config = if config_found {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    init_logging(&config.logging.level, cli.verbose);

    info!("🚦 Traffic Sign Recognition starting");
    if config_found {
        info!("✓ Configuration loaded from {}", cli.config);
    } else {
        warn!("Config file {} not found, using defaults", cli.config);
    }

    match cli.command {
        Command::Train {
            dataset,
            output,
            algorithm,
            features,
        } => run_train(config, dataset, &output, algorithm, features),
        Command::Detect {
            model,
            inputs,
            annotate_dir,
            response_maps,
            json,
        } => {
            let annotate = annotate_dir.map(|dir| Annotate { dir, response_maps });
            run_detect(&config, &model, &inputs, annotate.as_ref(), json)
        }
        Command::Classify { model, input, json } => run_classify(&config, &model, &input, json),
        Command::Inspect { model } => {
            let bank = model_store::load(&model)?;
            println!("{}", bank);
            Ok(())
        }
        Command::Render { model, output_dir } => run_render(&config, &model, output_dir),
    }
}

// ============================================================================
// TRAIN
// ============================================================================

fn run_train(
    mut config: Config,
    dataset: Option<PathBuf>,
    output: &Path,
    algorithm: Option<String>,
    features: Option<String>,
) -> Result<()> {
    if let Some(algorithm) = algorithm {
        config.training.algorithm = algorithm.parse()?;
    }
    if let Some(features) = features {
        config.training.features = features.parse()?;
    }
    let root = dataset.unwrap_or_else(|| PathBuf::from(&config.dataset.root));

    let t = &config.training;
    info!(
        "Training: algorithm={}, features={}, filter={}x{}, covariance={}, l={}, boundary={}, cosine_mask={}",
        t.algorithm.as_str(),
        t.features.as_str(),
        t.filter_shape[0],
        t.filter_shape[1],
        t.response_covariance,
        t.regularisation,
        t.boundary,
        t.cosine_mask
    );

    let started = Instant::now();
    let classes = dataset::discover(
        &root,
        &config.dataset.extensions,
        config.dataset.max_images_per_class,
    )?;

    let params = DetectorParams::from_config(&config.training);
    let bank = FilterBank::train(&classes, &params)?;
    model_store::save(output, &bank)?;

    let samples: usize = bank
        .detectors
        .iter()
        .map(|d| d.detector.model.n_training_images)
        .sum();

    info!("\n✓ Training complete!");
    info!("  Classes: {} ({})", bank.len(), bank.labels().join(", "));
    info!("  Training samples: {}", samples);
    info!("  Model: {}", output.display());
    info!("  Elapsed: {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

// ============================================================================
// DETECT
// ============================================================================

#[derive(Debug, Serialize)]
struct ImageReport {
    path: String,
    width: usize,
    height: usize,
    detections: Vec<Detection>,
}

#[derive(Debug)]
struct Annotate {
    dir: PathBuf,
    response_maps: bool,
}

#[derive(Debug, Default)]
struct DetectionStats {
    images: usize,
    failed: usize,
    detections: usize,
    per_label: BTreeMap<String, usize>,
    total_secs: f64,
}

fn run_detect(
    config: &Config,
    model: &Path,
    inputs: &[PathBuf],
    annotate: Option<&Annotate>,
    json: bool,
) -> Result<()> {
    let bank = model_store::load(model)?;
    let files = dataset::collect_inputs(inputs, &config.dataset.extensions)?;
    if files.is_empty() {
        error!("No images found in the given inputs");
        return Ok(());
    }

    info!("Found {} image(s) to process", files.len());
    info!(
        "Detection: scales={:?}, min_psr={:.1}, nms_iou={:.2}",
        config.detection.scales, config.detection.min_psr, config.detection.nms_iou_threshold
    );

    let mut stats = DetectionStats::default();
    let mut reports = Vec::new();

    for (idx, path) in files.iter().enumerate() {
        debug!("Processing {}/{}: {}", idx + 1, files.len(), path.display());
        let started = Instant::now();

        match process_image(&bank, config, path, annotate) {
            Ok(report) => {
                stats.images += 1;
                stats.detections += report.detections.len();
                for det in &report.detections {
                    *stats.per_label.entry(det.label.clone()).or_insert(0) += 1;
                }
                reports.push(report);
            }
            Err(e) => {
                stats.failed += 1;
                error!("Failed to process {}: {:#}", path.display(), e);
            }
        }

        stats.total_secs += started.elapsed().as_secs_f64();
    }

    if json {
        println!("{}", to_json(&reports)?);
    } else {
        for report in &reports {
            println!("{} ({}x{})", report.path, report.width, report.height);
            for det in &report.detections {
                let (cx, cy) = det.center();
                println!(
                    "  {:<20} psr={:>6.2} peak={:>9.4} scale={:.2} at ({:.0}, {:.0}) box=[{:.0}, {:.0}, {:.0}, {:.0}]",
                    det.label,
                    det.psr,
                    det.peak,
                    det.scale,
                    cx,
                    cy,
                    det.bbox[0],
                    det.bbox[1],
                    det.bbox[2],
                    det.bbox[3]
                );
            }
        }
    }

    info!("\n✓ Detection finished");
    info!("  Images processed: {}", stats.images);
    if stats.failed > 0 {
        warn!("  ⚠️  Failed images: {}", stats.failed);
    }
    info!("  🚸 Signs detected: {}", stats.detections);
    for (label, count) in &stats.per_label {
        info!("     {}: {}", label, count);
    }
    if stats.images > 0 {
        info!(
            "  Average time: {:.1} ms/image",
            1000.0 * stats.total_secs / (stats.images + stats.failed) as f64
        );
    }

    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialise results")
}

fn process_image(
    bank: &FilterBank,
    config: &Config,
    path: &Path,
    annotate: Option<&Annotate>,
) -> Result<ImageReport> {
    let image = MultiChannelImage::open(path)?;
    let detections = bank.detect(&image, &config.detection)?;

    if let Some(annotate) = annotate {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Input file has no usable name")?;
        let out = annotate.dir.join(format!("{}_detections.png", stem));
        let canvas = visualize::draw_detections(&image, &detections)?;
        visualize::save_png(&canvas, &out)?;

        if annotate.response_maps {
            for entry in &bank.detectors {
                let map = visualize::render_response_map(
                    &entry.detector,
                    &image,
                    config.output.colormap,
                )?;
                let out = annotate.dir.join(format!(
                    "{}_{}_response.png",
                    stem,
                    visualize::sanitize(&entry.label)
                ));
                visualize::save_png(&map, &out)?;
            }
        }
    }

    Ok(ImageReport {
        path: path.display().to_string(),
        width: image.width(),
        height: image.height(),
        detections,
    })
}

// ============================================================================
// CLASSIFY / RENDER
// ============================================================================

fn run_classify(config: &Config, model: &Path, input: &Path, json: bool) -> Result<()> {
    let bank = model_store::load(model)?;
    let patch = MultiChannelImage::open(input)?;
    let scores = bank.classify(&patch, config.detection.psr_exclusion)?;

    if json {
        println!("{}", to_json(&scores)?);
    } else {
        for (rank, score) in scores.iter().enumerate() {
            println!(
                "{:>2}. {:<20} psr={:>6.2} peak={:>9.4}",
                rank + 1,
                score.label,
                score.psr,
                score.peak
            );
        }
    }

    if let Some(best) = scores.first() {
        info!("🎯 Best match: {} (psr {:.2})", best.label, best.psr);
    }
    Ok(())
}

fn run_render(config: &Config, model: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    let bank = model_store::load(model)?;
    let out_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.output.output_dir));

    let mut written = 0;
    for entry in &bank.detectors {
        let files =
            visualize::render_detector(&entry.detector, &entry.label, &out_dir, config.output.colormap)?;
        written += files.len();
    }

    info!("🖼️  Wrote {} images to {}", written, out_dir.display());
    Ok(())
}
