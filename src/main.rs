use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use env_logger::{Builder, Env};
use image::DynamicImage;

use tumorscan::calibration::dataset;
use tumorscan::report::{self, DiagnosisRecord};
use tumorscan::{
    CalibrationResult, DebugConfig, Evaluation, ModelScorer, Normalizer, Pipeline,
    PipelineConfig, RawImage, Scorer, TensorLayout,
};

#[derive(Parser)]
#[command(name = "tumorscan")]
#[command(about = "Brain MRI tumor screening with test-time augmentation and calibrated thresholds")]
struct Cli {
    /// TOML file with pipeline settings
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Path to the .rten classifier
    #[arg(long, value_name = "MODEL")]
    model: PathBuf,

    /// Input layout the model expects (nhwc or nchw)
    #[arg(long, default_value = "nhwc")]
    layout: TensorLayout,

    /// Score views one at a time instead of in parallel
    #[arg(long)]
    sequential: bool,
}

#[derive(clap::Args)]
struct ThresholdArgs {
    /// Decision threshold
    #[arg(long, value_parser = parse_probability, conflicts_with = "calibration")]
    threshold: Option<f32>,

    /// Saved calibration result whose threshold to use
    #[arg(long, value_name = "FILE")]
    calibration: Option<PathBuf>,
}

impl ThresholdArgs {
    fn resolve(&self) -> anyhow::Result<f32> {
        match (self.threshold, &self.calibration) {
            (Some(t), _) => Ok(t),
            (None, Some(path)) => Ok(CalibrationResult::load_json(path)
                .with_context(|| format!("Failed to load calibration {}", path.display()))?
                .threshold),
            (None, None) => bail!("Supply either --threshold or --calibration"),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Classify one or more images (directories are expanded to their image files)
    Diagnose {
        /// Input image files or directories
        #[arg(value_name = "IMAGE", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        threshold: ThresholdArgs,

        /// Print the diagnoses as JSON
        #[arg(long)]
        json: bool,

        /// Write one row per image to this CSV file
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,

        /// Save debug outputs to directory (must be empty; single image only)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },

    /// Measure a threshold on a labeled image directory
    Evaluate {
        /// Directory with one sub-directory per class (notumor, glioma, ...)
        #[arg(value_name = "DIR")]
        dataset: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        threshold: ThresholdArgs,

        /// Maximum images per class directory (default: all)
        #[arg(long)]
        max_per_class: Option<usize>,

        /// Print the evaluation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search the decision threshold on a labeled image directory
    Calibrate {
        /// Directory with one sub-directory per class (notumor, glioma, ...)
        #[arg(value_name = "DIR")]
        dataset: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Maximum images per class
        #[arg(long)]
        max_per_class: Option<usize>,

        /// Write the calibration result to this JSON file
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Print every candidate threshold
        #[arg(long)]
        sweep: bool,
    },

    /// Normalize an image, writing the result and/or every intermediate stage
    Normalize {
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Save the normalized image (8-bit) to this file
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Save stage outputs to directory (must be empty)
        #[arg(long, value_name = "DIR", required_unless_present = "output")]
        debug_out: Option<PathBuf>,
    },
}

/// Parse probability value (must be between 0.0 and 1.0)
fn parse_probability(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

fn init_logging(verbosity: &Verbosity<WarnLevel>) {
    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        Builder::from_env(Env::default())
    } else {
        let mut builder = Builder::new();
        builder.filter_level(verbosity.log_level_filter());
        builder
    };
    builder.format_timestamp(None).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn build_pipeline(args: &ModelArgs, mut config: PipelineConfig) -> anyhow::Result<Pipeline> {
    if args.sequential {
        config.tta.parallel = false;
    }
    let scorer = ModelScorer::load(&args.model, args.layout)?;
    let pipeline = Pipeline::new(Arc::new(scorer), config)?;

    let settings = pipeline.config();
    log::info!(
        "Model {} loaded; input {}x{}, {} view scoring",
        pipeline.scorer().name(),
        settings.normalize.target_width,
        settings.normalize.target_height,
        if settings.tta.parallel { "parallel" } else { "sequential" }
    );
    Ok(pipeline)
}

/// Expand directories into their image files, keeping argument order
fn collect_images(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let files = dataset::image_files(input)
                .with_context(|| format!("Failed to list {}", input.display()))?;
            if files.is_empty() {
                log::warn!("No images in {}", input.display());
            }
            paths.extend(files);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn load_image(path: &Path) -> anyhow::Result<RawImage> {
    RawImage::open(path).with_context(|| format!("Failed to load image {}", path.display()))
}

fn print_evaluation(eval: &Evaluation) {
    let c = eval.confusion();
    println!("\n=== Evaluation at threshold {:.2} ===", eval.threshold());
    println!(
        "Samples: {} positive, {} negative",
        eval.positives, eval.negatives
    );
    println!("\n                 predicted tumor  predicted normal");
    println!("  actual tumor   {:>15}  {:>16}", c.true_positives, c.false_negatives);
    println!("  actual normal  {:>15}  {:>16}", c.false_positives, c.true_negatives);
    println!();
    println!("Accuracy:    {:.1}%", eval.accuracy * 100.0);
    println!("Sensitivity: {:.1}%", eval.metrics.sensitivity * 100.0);
    println!("Specificity: {:.1}%", eval.metrics.specificity * 100.0);
    println!("Precision:   {:.1}%", eval.precision * 100.0);
    match eval.roc_auc {
        Some(auc) => println!("ROC AUC:     {auc:.3}"),
        None => println!("ROC AUC:     n/a (single class)"),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.verbosity);
    let config = load_config(&cli)?;

    match cli.command {
        Command::Diagnose {
            inputs,
            model,
            threshold,
            json,
            csv,
            debug_out,
        } => {
            let threshold = threshold.resolve()?;
            let paths = collect_images(&inputs)?;
            if paths.is_empty() {
                bail!("No images to diagnose");
            }
            if debug_out.is_some() && paths.len() > 1 {
                bail!("--debug-out needs a single image, got {}", paths.len());
            }

            let mut pipeline = build_pipeline(&model, config)?;
            let records = if let [path] = paths.as_slice() {
                let image = load_image(path)?;
                log::info!("Image loaded: {}x{}", image.width(), image.height());
                if let Some(dir) = debug_out {
                    pipeline = pipeline.with_debug(dir)?;
                }
                let diagnosis = pipeline.diagnose(&image, threshold)?;
                if !json {
                    println!("\n=== Diagnosis: {} ===", path.display());
                    println!("{diagnosis}");
                }
                vec![DiagnosisRecord::new(path, &diagnosis)]
            } else {
                let mut loaded = Vec::new();
                let mut images = Vec::new();
                for path in paths {
                    match load_image(&path) {
                        Ok(image) => {
                            images.push(image);
                            loaded.push(path);
                        }
                        Err(e) => log::warn!("Skipping: {e:#}"),
                    }
                }
                log::info!("Processing {} images", images.len());

                let diagnoses = pipeline.diagnose_batch(&images, threshold)?;
                let records: Vec<DiagnosisRecord> = loaded
                    .iter()
                    .zip(&diagnoses)
                    .map(|(path, d)| DiagnosisRecord::new(path, d))
                    .collect();
                if !json {
                    println!("\n=== Diagnoses (threshold {threshold:.2}) ===");
                    for record in &records {
                        println!(
                            "{:<40} {:<8} {:5.1}%  confidence {:5.1}% [{}]",
                            record.image_name,
                            record.label.to_string(),
                            record.score * 100.0,
                            record.confidence * 100.0,
                            record.confidence_level
                        );
                    }
                    let positives = records.iter().filter(|r| r.label.is_positive()).count();
                    println!("\n{} of {} flagged as tumor", positives, records.len());
                }
                records
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("This is a screening aid, not a medical diagnosis.");
            }
            if let Some(path) = csv {
                report::save_csv(&path, &records)?;
                println!("Saved results to {}", path.display());
            }
        }

        Command::Evaluate {
            dataset: root,
            model,
            threshold,
            max_per_class,
            json,
        } => {
            let threshold = threshold.resolve()?;
            let samples = dataset::load_labeled_dir(&root, max_per_class)
                .with_context(|| format!("Failed to read dataset {}", root.display()))?;
            log::info!("Loaded {} labeled images", samples.len());

            let pipeline = build_pipeline(&model, config)?;
            let evaluation = pipeline.evaluate(&samples, threshold)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&evaluation)?);
            } else {
                print_evaluation(&evaluation);
            }
        }

        Command::Calibrate {
            dataset: root,
            model,
            max_per_class,
            output,
            sweep,
        } => {
            let mut config = config;
            if max_per_class.is_some() {
                config.calibration.max_per_class = max_per_class;
            }
            let samples = dataset::load_labeled_dir(&root, config.calibration.max_per_class)
                .with_context(|| format!("Failed to read dataset {}", root.display()))?;
            log::info!("Loaded {} labeled images", samples.len());
            // The loader already capped each class directory
            config.calibration.max_per_class = None;

            let pipeline = build_pipeline(&model, config)?;
            let result = pipeline.calibrate(&samples)?;

            println!("\n=== Calibration Results ===");
            println!(
                "Samples: {} positive, {} negative",
                result.positives, result.negatives
            );
            println!("Optimal threshold: {:.2}", result.threshold);
            println!(
                "Sensitivity: {:.1}%  Specificity: {:.1}%  (J = {:.3})",
                result.sensitivity * 100.0,
                result.specificity * 100.0,
                result.youden_j
            );
            if sweep {
                println!("\n threshold  sens.   spec.   J");
                for m in &result.sweep {
                    println!(
                        "   {:.2}    {:5.1}%  {:5.1}%  {:+.3}",
                        m.threshold,
                        m.sensitivity * 100.0,
                        m.specificity * 100.0,
                        m.youden_j
                    );
                }
            }

            if let Some(path) = output {
                result.save_json(&path)?;
                println!("\nSaved calibration to {}", path.display());
            }
        }

        Command::Normalize {
            image_path,
            output,
            debug_out,
        } => {
            let image = RawImage::open(&image_path)
                .with_context(|| format!("Failed to load image {}", image_path.display()))?;
            let debug = debug_out.as_ref().map(DebugConfig::new).transpose()?;
            if let Some(debug) = &debug {
                let input = DynamicImage::ImageRgb8(image.as_rgb().clone());
                debug.save_stage(0, "input", "01.png", &input)?;
            }

            let tensor = Normalizer::new(&config.normalize)?.run(&image, debug.as_ref())?;
            let (h, w, c) = tensor.shape();
            println!("Normalized to {h}x{w}x{c}");

            if let Some(path) = output {
                DynamicImage::ImageRgb32F(tensor.as_image().clone())
                    .to_rgb8()
                    .save(&path)
                    .with_context(|| format!("Failed to save {}", path.display()))?;
                println!("Saved normalized image to {}", path.display());
            }
            if let Some(dir) = debug_out {
                println!("Stages written to {}", dir.display());
            }
        }
    }

    Ok(())
}
