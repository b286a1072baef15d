//! Flat per-image rows for batch diagnosis output (CSV or JSON).

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::models::{ConfidenceLevel, Diagnosis, Label};

/// One diagnosed image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisRecord {
    pub image_name: String,
    pub image_path: String,
    pub label: Label,
    pub score: f32,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub threshold: f32,
}

impl DiagnosisRecord {
    pub fn new(path: impl AsRef<Path>, diagnosis: &Diagnosis) -> Self {
        let path = path.as_ref();
        Self {
            image_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            image_path: path.display().to_string(),
            label: diagnosis.label,
            score: diagnosis.score,
            confidence: diagnosis.confidence,
            confidence_level: diagnosis.confidence_level,
            threshold: diagnosis.threshold,
        }
    }
}

/// Write `records` as CSV with a header row
pub fn write_csv<W: Write>(writer: W, records: &[DiagnosisRecord]) -> csv::Result<()> {
    let mut writer = csv::WriterBuilder::new().from_writer(writer);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_csv(path: impl AsRef<Path>, records: &[DiagnosisRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path).map_err(|e| PipelineError::io(path, e))?;
    write_csv(file, records).map_err(|e| match e.into_kind() {
        csv::ErrorKind::Io(io) => PipelineError::io(path, io),
        other => PipelineError::InvariantViolation(format!(
            "cannot write {}: {other:?}",
            path.display()
        )),
    })
}
