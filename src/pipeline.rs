use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use rayon::prelude::*;

use crate::calibration::{self, CalibrationResult, Evaluation};
use crate::config::{CalibrationConfig, PipelineConfig};
use crate::decision;
use crate::error::{PipelineError, Result};
use crate::models::{Diagnosis, Label, LabeledSample, NormalizedTensor, RawImage};
use crate::preprocessing::Normalizer;
use crate::scoring::{ScoreAggregator, Scorer};
use crate::tta::{self, AugmentedView};

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

impl DebugConfig {
    /// Use `output_dir` for debug images. The directory must be empty or non-existent.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        if output_dir.exists() {
            let mut entries =
                std::fs::read_dir(&output_dir).map_err(|e| PipelineError::io(&output_dir, e))?;
            if entries.next().is_some() {
                return Err(PipelineError::InvalidParameter(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)
                .map_err(|e| PipelineError::io(&output_dir, e))?;
        }
        Ok(Self { output_dir })
    }

    /// Write `image` as `NN_step_name/file_name`
    pub fn save_stage(
        &self,
        index: usize,
        step_name: &str,
        file_name: &str,
        image: &DynamicImage,
    ) -> Result<()> {
        let step_dir_name = format!(
            "{:02}_{}",
            index,
            step_name.to_lowercase().replace(' ', "_")
        );
        let step_dir = self.output_dir.join(&step_dir_name);
        std::fs::create_dir_all(&step_dir).map_err(|e| PipelineError::io(&step_dir, e))?;

        let output_path = step_dir.join(file_name);
        image.save(&output_path).map_err(|e| match e {
            image::ImageError::IoError(io) => PipelineError::io(&output_path, io),
            other => PipelineError::InvariantViolation(format!(
                "cannot encode debug image {}: {other}",
                output_path.display()
            )),
        })?;
        log::debug!("Debug: saved {}/{}", step_dir_name, file_name);
        Ok(())
    }
}

/// Normalize, expand and score images with an injected [`Scorer`].
///
/// Stateless between requests; a single pipeline can serve concurrent callers.
pub struct Pipeline {
    scorer: Arc<dyn Scorer>,
    config: PipelineConfig,
    normalizer: Normalizer,
    aggregator: ScoreAggregator,
    debug: Option<DebugConfig>,
}

impl Pipeline {
    pub fn new(scorer: Arc<dyn Scorer>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            normalizer: Normalizer::new(&config.normalize)?,
            aggregator: ScoreAggregator::new(&config.tta)?,
            scorer,
            config,
            debug: None,
        })
    }

    /// Enable debug mode with output directory.
    /// The directory must be empty or non-existent.
    pub fn with_debug(mut self, output_dir: impl Into<PathBuf>) -> Result<Self> {
        self.debug = Some(DebugConfig::new(output_dir)?);
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }

    /// Raw image to tensor, writing stage images in debug mode
    pub fn normalize(&self, raw: &RawImage) -> Result<NormalizedTensor> {
        if let Some(debug) = &self.debug {
            let input = DynamicImage::ImageRgb8(raw.as_rgb().clone());
            debug.save_stage(0, "input", "01.png", &input)?;
        }
        self.normalizer.run(raw, self.debug.as_ref())
    }

    /// The six test-time views of `raw`
    pub fn views(&self, raw: &RawImage) -> Result<Vec<AugmentedView>> {
        let tensor = self.normalize(raw)?;
        let views = tta::expand(&tensor);

        if let Some(debug) = &self.debug {
            let index = self.normalizer.steps().count() + 1;
            for (i, view) in views.iter().enumerate() {
                let img = DynamicImage::ImageRgb32F(view.tensor.as_image().clone()).to_rgb8();
                let file_name = format!("{:02}_{}.png", i + 1, view.transform);
                debug.save_stage(index, "tta views", &file_name, &DynamicImage::ImageRgb8(img))?;
            }
        }
        Ok(views)
    }

    /// Aggregated positive-class probability for one image
    pub fn score(&self, raw: &RawImage) -> Result<f32> {
        let views = self.views(raw)?;
        self.aggregator.score(&views, self.scorer.as_ref())
    }

    /// Single-image inference with an explicit (default or calibrated) threshold
    pub fn diagnose(&self, raw: &RawImage, threshold: f32) -> Result<Diagnosis> {
        let score = self.score(raw)?;
        let diagnosis = decision::decide(score, threshold)?;
        log::info!("{}", diagnosis);
        Ok(diagnosis)
    }

    /// Diagnose several images with one threshold, results in input order.
    ///
    /// Images are scored on the aggregator's pool; any failure fails the whole batch.
    /// Debug output is not written.
    pub fn diagnose_batch(&self, images: &[RawImage], threshold: f32) -> Result<Vec<Diagnosis>> {
        decision::check_threshold(threshold)?;
        let refs: Vec<&RawImage> = images.iter().collect();
        let scores = score_images(
            &self.normalizer,
            &self.aggregator,
            self.scorer.as_ref(),
            &refs,
        )?;
        log::info!("Diagnosed {} images with {}", scores.len(), self.scorer.name());
        scores
            .into_iter()
            .map(|score| decision::decide(score, threshold))
            .collect()
    }

    /// Measure a fixed threshold on a labeled set. Every sample is scored; no per-class cap.
    pub fn evaluate(&self, samples: &[LabeledSample], threshold: f32) -> Result<Evaluation> {
        decision::check_threshold(threshold)?;
        if samples.is_empty() {
            return Err(PipelineError::InsufficientCalibrationData(
                "evaluation set is empty".to_string(),
            ));
        }
        let selected: Vec<&LabeledSample> = samples.iter().collect();
        let scored = score_samples(
            &self.normalizer,
            &self.aggregator,
            self.scorer.as_ref(),
            &selected,
        )?;
        calibration::evaluate(&scored, threshold)
    }

    /// Tune the decision threshold on a labeled sample set.
    ///
    /// At most `calibration.max_per_class` samples of each label are scored (first ones in
    /// input order). Debug output is not written during calibration.
    pub fn calibrate(&self, samples: &[LabeledSample]) -> Result<CalibrationResult> {
        run_calibration(
            &self.normalizer,
            &self.aggregator,
            self.scorer.as_ref(),
            &self.config.calibration,
            samples,
        )
    }
}

/// Aggregated score of every image, in input order
fn score_images(
    normalizer: &Normalizer,
    aggregator: &ScoreAggregator,
    scorer: &dyn Scorer,
    images: &[&RawImage],
) -> Result<Vec<f32>> {
    let score_one = |raw: &&RawImage| -> Result<f32> {
        let tensor = normalizer.normalize(raw)?;
        aggregator.score(&tta::expand(&tensor), scorer)
    };
    if aggregator.is_parallel() {
        aggregator.install(|| images.par_iter().map(score_one).collect())
    } else {
        images.iter().map(score_one).collect()
    }
}

fn score_samples(
    normalizer: &Normalizer,
    aggregator: &ScoreAggregator,
    scorer: &dyn Scorer,
    samples: &[&LabeledSample],
) -> Result<Vec<(f32, Label)>> {
    let images: Vec<&RawImage> = samples.iter().map(|s| &s.image).collect();
    let scores = score_images(normalizer, aggregator, scorer, &images)?;
    Ok(scores
        .into_iter()
        .zip(samples.iter().map(|s| s.label))
        .collect())
}

fn run_calibration(
    normalizer: &Normalizer,
    aggregator: &ScoreAggregator,
    scorer: &dyn Scorer,
    settings: &CalibrationConfig,
    samples: &[LabeledSample],
) -> Result<CalibrationResult> {
    let selected = calibration::cap_per_class(samples, settings.max_per_class);

    let positives = selected.iter().filter(|s| s.label.is_positive()).count();
    calibration::check_classes(positives, selected.len() - positives)?;
    log::info!(
        "Scoring {} calibration samples ({} positive) with {}",
        selected.len(),
        positives,
        scorer.name()
    );

    let scored = score_samples(normalizer, aggregator, scorer, &selected)?;
    calibration::select_threshold(&scored, &settings.candidates())
}

/// Single-image inference with a scorer supplied per call
pub fn diagnose(
    raw: &RawImage,
    threshold: f32,
    scorer: &dyn Scorer,
    config: &PipelineConfig,
) -> Result<Diagnosis> {
    config.validate()?;
    let tensor = Normalizer::new(&config.normalize)?.normalize(raw)?;
    let score = ScoreAggregator::new(&config.tta)?.score(&tta::expand(&tensor), scorer)?;
    decision::decide(score, threshold)
}

/// Threshold calibration with a scorer supplied per call
pub fn calibrate(
    samples: &[LabeledSample],
    scorer: &dyn Scorer,
    config: &PipelineConfig,
) -> Result<CalibrationResult> {
    config.validate()?;
    run_calibration(
        &Normalizer::new(&config.normalize)?,
        &ScoreAggregator::new(&config.tta)?,
        scorer,
        &config.calibration,
        samples,
    )
}
