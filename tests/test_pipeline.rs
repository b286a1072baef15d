mod common;
use common::*;

use std::sync::Arc;

#[test]
fn test_diagnose_bright_and_dark_images() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(brightness_scorer(), small_config())?;

    let bright = pipeline.diagnose(&uniform_image(64, 64, 200), 0.5)?;
    assert_eq!(bright.label, Label::Positive);
    assert!((bright.score - 0.95).abs() < 1e-6);

    let dark = pipeline.diagnose(&uniform_image(64, 64, 40), 0.5)?;
    assert_eq!(dark.label, Label::Negative);
    assert!((dark.confidence - 0.95).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_scorer_sees_six_normalized_views() -> anyhow::Result<()> {
    let scorer = Arc::new(CountingScorer::new(0.7));
    let pipeline = Pipeline::new(scorer.clone(), small_config())?;

    let views = pipeline.views(&gradient_image(100, 80))?;
    assert_eq!(views.len(), 6);
    for view in &views {
        assert_eq!(view.tensor.shape(), (32, 32, 3));
    }

    let diagnosis = pipeline.diagnose(&gradient_image(100, 80), 0.5)?;
    assert_eq!(scorer.calls(), 6);
    assert!((diagnosis.score - 0.7).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_repeated_requests_are_identical() -> anyhow::Result<()> {
    let scorer = Arc::new(tumorscan::FnScorer::new("mean", |t: &NormalizedTensor| {
        Ok(mean_intensity(t))
    }));
    let pipeline = Pipeline::new(scorer, small_config())?;
    let image = gradient_image(90, 120);

    let first = pipeline.diagnose(&image, 0.5)?;
    let second = pipeline.diagnose(&image, 0.5)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_scorer_failure_propagates() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(Arc::new(CountingScorer::failing_on(3)), small_config())?;
    let result = pipeline.diagnose(&uniform_image(64, 64, 100), 0.5);
    assert!(matches!(result, Err(PipelineError::ScorerInvocation { .. })));
    Ok(())
}

#[test]
fn test_invalid_threshold_rejected() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(constant_scorer(0.5), small_config())?;
    let result = pipeline.diagnose(&uniform_image(32, 32, 100), 1.1);
    assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    Ok(())
}

#[test]
fn test_debug_outputs_written() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let debug_dir = dir.path().join("debug");

    let pipeline = Pipeline::new(constant_scorer(0.3), small_config())?.with_debug(&debug_dir)?;
    pipeline.diagnose(&gradient_image(80, 80), 0.5)?;

    for stage in [
        "00_input/01.png",
        "01_crop_margin/01.png",
        "02_grayscale/01.png",
        "03_equalize/01.png",
        "06_resize/01.png",
        "07_tta_views/01_identity.png",
        "07_tta_views/06_rotate_270.png",
    ] {
        assert!(debug_dir.join(stage).exists(), "missing {stage}");
    }
    Ok(())
}

#[test]
fn test_debug_dir_must_be_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("leftover.txt"), "x")?;

    let result = Pipeline::new(constant_scorer(0.3), small_config())?.with_debug(dir.path());
    assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    Ok(())
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = small_config();
    config.normalize.crop_margin = 0.6;
    assert!(matches!(
        Pipeline::new(constant_scorer(0.3), config),
        Err(PipelineError::InvalidParameter(_))
    ));
}

#[test]
fn test_concurrent_requests() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(brightness_scorer(), small_config())?;
    let images = [
        uniform_image(64, 64, 200),
        uniform_image(64, 64, 40),
        uniform_image(64, 64, 210),
    ];

    let labels = std::thread::scope(|s| {
        let handles: Vec<_> = images
            .iter()
            .map(|img| s.spawn(|| pipeline.diagnose(img, 0.5).map(|d| d.label)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .collect::<tumorscan::Result<Vec<_>>>()
    })?;

    assert_eq!(labels, vec![Label::Positive, Label::Negative, Label::Positive]);
    Ok(())
}

#[test]
fn test_free_functions_take_the_scorer_per_call() -> anyhow::Result<()> {
    let config = small_config();
    let scorer = brightness_scorer();

    let bright = uniform_image(64, 64, 200);
    let diagnosis = tumorscan::diagnose(&bright, 0.5, scorer.as_ref(), &config)?;
    assert_eq!(diagnosis.label, Label::Positive);

    let result = tumorscan::calibrate(&labeled_set(3, 3), scorer.as_ref(), &config)?;
    assert_eq!((result.sensitivity, result.specificity), (1.0, 1.0));

    let pipeline = Pipeline::new(scorer, config)?;
    assert_eq!(pipeline.calibrate(&labeled_set(3, 3))?.threshold, result.threshold);
    Ok(())
}

#[test]
fn test_accessors_expose_scorer_and_config() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(brightness_scorer(), small_config())?;
    assert_eq!(pipeline.scorer().name(), "brightness");
    assert_eq!(pipeline.config().normalize.target_width, 32);
    assert_eq!(pipeline.config().normalize.target_height, 32);
    Ok(())
}

#[test]
fn test_diagnose_batch_keeps_input_order() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(brightness_scorer(), small_config())?;
    let images = vec![
        uniform_image(64, 64, 200),
        uniform_image(64, 64, 40),
        uniform_image(48, 80, 210),
    ];

    let diagnoses = pipeline.diagnose_batch(&images, 0.5)?;
    let labels: Vec<Label> = diagnoses.iter().map(|d| d.label).collect();
    assert_eq!(labels, vec![Label::Positive, Label::Negative, Label::Positive]);

    for (image, batch) in images.iter().zip(&diagnoses) {
        assert_eq!(*batch, pipeline.diagnose(image, 0.5)?);
    }
    Ok(())
}

#[test]
fn test_diagnose_batch_is_all_or_nothing() -> anyhow::Result<()> {
    let mut config = small_config();
    config.tta.parallel = false;
    let pipeline = Pipeline::new(Arc::new(CountingScorer::failing_on(9)), config)?;

    let images = vec![uniform_image(32, 32, 100), uniform_image(32, 32, 120)];
    let result = pipeline.diagnose_batch(&images, 0.5);
    assert!(matches!(result, Err(PipelineError::ScorerInvocation { .. })));
    Ok(())
}

#[test]
fn test_diagnose_batch_checks_threshold_before_scoring() -> anyhow::Result<()> {
    let scorer = Arc::new(CountingScorer::new(0.5));
    let pipeline = Pipeline::new(scorer.clone(), small_config())?;

    let result = pipeline.diagnose_batch(&[uniform_image(32, 32, 100)], -0.2);
    assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
    assert_eq!(scorer.calls(), 0);

    assert!(pipeline.diagnose_batch(&[], 0.5)?.is_empty());
    Ok(())
}

#[test]
fn test_evaluate_at_fixed_threshold() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(brightness_scorer(), small_config())?;

    let evaluation = pipeline.evaluate(&labeled_set(4, 3), 0.5)?;
    assert_eq!((evaluation.positives, evaluation.negatives), (4, 3));
    assert_eq!(evaluation.confusion().true_positives, 4);
    assert_eq!(evaluation.confusion().true_negatives, 3);
    assert_eq!(evaluation.accuracy, 1.0);
    assert_eq!(evaluation.precision, 1.0);
    assert_eq!(evaluation.roc_auc, Some(1.0));

    // Every score lies below 0.99, so nothing is flagged
    let strict = pipeline.evaluate(&labeled_set(4, 3), 0.99)?;
    assert_eq!(strict.metrics.sensitivity, 0.0);
    assert_eq!(strict.metrics.specificity, 1.0);
    assert_eq!(strict.precision, 0.0);

    let empty = pipeline.evaluate(&[], 0.5);
    assert!(matches!(empty, Err(PipelineError::InsufficientCalibrationData(_))));
    Ok(())
}
