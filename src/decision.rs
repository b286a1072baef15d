use crate::error::{PipelineError, Result};
use crate::models::{ConfidenceLevel, Diagnosis, Label};

/// Turn an aggregated score into a diagnosis: positive iff `score > threshold`,
/// confidence is the probability mass of the chosen label.
pub fn decide(score: f32, threshold: f32) -> Result<Diagnosis> {
    if !(0.0..=1.0).contains(&score) {
        return Err(PipelineError::InvariantViolation(format!(
            "score {score} outside [0, 1]"
        )));
    }
    check_threshold(threshold)?;

    let label = if score > threshold {
        Label::Positive
    } else {
        Label::Negative
    };
    let confidence = score.max(1.0 - score);

    Ok(Diagnosis {
        score,
        threshold,
        label,
        confidence,
        confidence_level: ConfidenceLevel::from_confidence(confidence),
    })
}

/// A decision threshold must be a probability
pub fn check_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::InvalidParameter(format!(
            "threshold {threshold} outside [0, 1]"
        )));
    }
    Ok(())
}
