use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::models::{Label, LabeledSample, RawImage};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Ground-truth label for a class directory name, if it is one we know
pub fn label_for_class(name: &str) -> Option<Label> {
    match name.to_lowercase().as_str() {
        "notumor" | "no_tumor" | "no" | "normal" => Some(Label::Negative),
        "glioma" | "meningioma" | "pituitary" | "tumor" | "yes" => Some(Label::Positive),
        _ => None,
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| PipelineError::io(dir, e))?;
    paths.sort();
    Ok(paths)
}

/// Image files directly inside `dir`, sorted by name
pub fn image_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir.as_ref())?
        .into_iter()
        .filter(|p| p.is_file() && is_image(p))
        .collect())
}

/// Load a labeled calibration set from `root/<class>/<image>`.
///
/// Class directories are mapped with [`label_for_class`]; unknown ones are skipped. Images are
/// read in file-name order, at most `max_per_class` per class directory. Files that fail to
/// decode are logged and skipped.
pub fn load_labeled_dir(
    root: impl AsRef<Path>,
    max_per_class: Option<usize>,
) -> Result<Vec<LabeledSample>> {
    let root = root.as_ref();
    let mut samples = Vec::new();
    let mut per_class: BTreeMap<String, usize> = BTreeMap::new();

    for class_dir in sorted_entries(root)? {
        if !class_dir.is_dir() {
            continue;
        }
        let class_name = class_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(label) = label_for_class(&class_name) else {
            log::warn!("Skipping unknown class directory: {}", class_dir.display());
            continue;
        };

        let files = image_files(&class_dir)?
            .into_iter()
            .take(max_per_class.unwrap_or(usize::MAX));

        for path in files {
            match RawImage::open(&path) {
                Ok(image) => {
                    samples.push(LabeledSample {
                        image,
                        label,
                        source: Some(path),
                    });
                    *per_class.entry(class_name.clone()).or_default() += 1;
                }
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }
    }

    for (class, count) in &per_class {
        log::info!("Loaded {} images from class '{}'", count, class);
    }

    Ok(samples)
}
