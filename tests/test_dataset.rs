mod common;
use common::*;

use std::path::Path;

use image::{Rgb, RgbImage};
use tumorscan::calibration::dataset::{image_files, label_for_class, load_labeled_dir};

fn write_png(path: &Path, value: u8) -> anyhow::Result<()> {
    RgbImage::from_pixel(24, 24, Rgb([value, value, value])).save(path)?;
    Ok(())
}

/// notumor: 3 images; glioma: 2; meningioma: 1 good, 1 corrupt, 1 text file; unknown: 1
fn build_dataset(root: &Path) -> anyhow::Result<()> {
    for class in ["notumor", "glioma", "meningioma", "unknown"] {
        std::fs::create_dir(root.join(class))?;
    }
    for name in ["a.png", "b.png", "c.png"] {
        write_png(&root.join("notumor").join(name), 30)?;
    }
    write_png(&root.join("glioma").join("a.png"), 220)?;
    write_png(&root.join("glioma").join("b.PNG"), 220)?;
    write_png(&root.join("meningioma").join("a.png"), 200)?;
    std::fs::write(root.join("meningioma").join("b.png"), b"not really a png")?;
    std::fs::write(root.join("meningioma").join("notes.txt"), b"scanner notes")?;
    write_png(&root.join("unknown").join("a.png"), 128)?;
    std::fs::write(root.join("README.md"), b"dataset")?;
    Ok(())
}

fn count(samples: &[LabeledSample], label: Label) -> usize {
    samples.iter().filter(|s| s.label == label).count()
}

#[test]
fn test_class_names() {
    assert_eq!(label_for_class("notumor"), Some(Label::Negative));
    assert_eq!(label_for_class("NoTumor"), Some(Label::Negative));
    for class in ["glioma", "meningioma", "pituitary"] {
        assert_eq!(label_for_class(class), Some(Label::Positive));
    }
    assert_eq!(label_for_class("thumbnails"), None);
}

#[test]
fn test_load_skips_unreadable_and_unknown() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    build_dataset(dir.path())?;

    let samples = load_labeled_dir(dir.path(), None)?;
    assert_eq!(count(&samples, Label::Negative), 3);
    assert_eq!(count(&samples, Label::Positive), 3);
    assert!(samples.iter().all(|s| s.source.is_some()));
    assert!(samples.iter().all(|s| s.image.width() == 24));
    Ok(())
}

#[test]
fn test_load_caps_each_class_directory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    build_dataset(dir.path())?;

    // meningioma's second image is corrupt, so its cap of 2 yields one sample
    let samples = load_labeled_dir(dir.path(), Some(2))?;
    assert_eq!(count(&samples, Label::Negative), 2);
    assert_eq!(count(&samples, Label::Positive), 3);

    let first_negative = samples
        .iter()
        .find(|s| s.label == Label::Negative)
        .and_then(|s| s.source.as_ref())
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    assert_eq!(first_negative.as_deref(), Some("a.png"));
    Ok(())
}

#[test]
fn test_missing_root() {
    let result = load_labeled_dir("/nonexistent/tumorscan/dataset", None);
    assert!(matches!(result, Err(PipelineError::Io { .. })));
}

#[test]
fn test_calibrate_loaded_dataset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    build_dataset(dir.path())?;

    let samples = load_labeled_dir(dir.path(), None)?;
    let pipeline = Pipeline::new(brightness_scorer(), small_config())?;
    let result = pipeline.calibrate(&samples)?;

    assert_eq!((result.positives, result.negatives), (3, 3));
    assert_eq!(result.youden_j, 1.0);
    Ok(())
}

#[test]
fn test_image_files_lists_sorted_images_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    build_dataset(dir.path())?;

    let files = image_files(dir.path().join("meningioma"))?;
    let names: Vec<String> = files
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names, vec!["a.png", "b.png"]);

    // class directories and README.md are not images
    assert!(image_files(dir.path())?.is_empty());
    Ok(())
}
