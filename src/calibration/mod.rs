//! Decision-threshold calibration.
//!
//! Scores a labeled sample set through the full normalize/expand/aggregate path, sweeps an
//! ascending list of candidate thresholds and keeps the one with the largest Youden's J
//! (sensitivity + specificity - 1). Ties go to the first (lowest) candidate.
//!
//! A calibration belongs to the scorer and sample set it was computed from; replacing the
//! model means recalibrating.

pub mod dataset;

use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::decision;
use crate::error::{PipelineError, Result};
use crate::models::{Label, LabeledSample};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl ConfusionCounts {
    /// Count outcomes for `score > threshold` predictions
    pub fn tally(scored: &[(f32, Label)], threshold: f32) -> Self {
        let mut counts = Self::default();
        for &(score, label) in scored {
            match (score > threshold, label) {
                (true, Label::Positive) => counts.true_positives += 1,
                (false, Label::Negative) => counts.true_negatives += 1,
                (true, Label::Negative) => counts.false_positives += 1,
                (false, Label::Positive) => counts.false_negatives += 1,
            }
        }
        counts
    }

    /// TP / (TP + FN), or 0 with no positives
    pub fn sensitivity(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    /// TN / (TN + FP), or 0 with no negatives
    pub fn specificity(&self) -> f32 {
        ratio(
            self.true_negatives,
            self.true_negatives + self.false_positives,
        )
    }

    pub fn youden_j(&self) -> f32 {
        self.sensitivity() + self.specificity() - 1.0
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// TP / (TP + FP), or 0 with no positive predictions
    pub fn precision(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }
}

fn ratio(num: usize, denom: usize) -> f32 {
    if denom == 0 {
        0.0
    } else {
        num as f32 / denom as f32
    }
}

/// Quality of one candidate threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMetrics {
    pub threshold: f32,
    pub sensitivity: f32,
    pub specificity: f32,
    pub youden_j: f32,
    pub confusion: ConfusionCounts,
}

impl ThresholdMetrics {
    pub fn evaluate(scored: &[(f32, Label)], threshold: f32) -> Self {
        let confusion = ConfusionCounts::tally(scored, threshold);
        Self {
            threshold,
            sensitivity: confusion.sensitivity(),
            specificity: confusion.specificity(),
            youden_j: confusion.youden_j(),
            confusion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub threshold: f32,
    pub sensitivity: f32,
    pub specificity: f32,
    pub youden_j: f32,
    pub positives: usize,
    pub negatives: usize,
    /// Every candidate, ascending
    pub sweep: Vec<ThresholdMetrics>,
    #[serde(with = "time::serde::rfc3339")]
    pub calibrated_at: OffsetDateTime,
}

impl CalibrationResult {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|e| {
            PipelineError::InvariantViolation(format!("calibration is not serializable: {e}"))
        })?;
        std::fs::write(path, text).map_err(|e| PipelineError::io(path, e))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let result: Self = serde_json::from_str(&text).map_err(|e| {
            PipelineError::InvalidParameter(format!("{}: {e}", path.display()))
        })?;
        if !(0.0..=1.0).contains(&result.threshold) {
            return Err(PipelineError::InvalidParameter(format!(
                "{}: threshold {} outside [0, 1]",
                path.display(),
                result.threshold
            )));
        }
        Ok(result)
    }
}

/// How a fixed threshold performs on a labeled set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub metrics: ThresholdMetrics,
    pub precision: f32,
    pub accuracy: f32,
    /// Area under the ROC curve, when both classes are present
    pub roc_auc: Option<f32>,
    pub positives: usize,
    pub negatives: usize,
}

impl Evaluation {
    pub fn threshold(&self) -> f32 {
        self.metrics.threshold
    }

    pub fn confusion(&self) -> &ConfusionCounts {
        &self.metrics.confusion
    }
}

/// Score already computed for each sample; one class alone is accepted (AUC is then `None`)
pub fn evaluate(scored: &[(f32, Label)], threshold: f32) -> Result<Evaluation> {
    if scored.is_empty() {
        return Err(PipelineError::InsufficientCalibrationData(
            "evaluation set is empty".to_string(),
        ));
    }
    decision::check_threshold(threshold)?;
    if let Some((score, _)) = scored.iter().find(|(s, _)| !(0.0..=1.0).contains(s)) {
        return Err(PipelineError::InvariantViolation(format!(
            "evaluation score {score} outside [0, 1]"
        )));
    }

    let metrics = ThresholdMetrics::evaluate(scored, threshold);
    let positives = scored.iter().filter(|(_, l)| l.is_positive()).count();
    let evaluation = Evaluation {
        metrics,
        precision: metrics.confusion.precision(),
        accuracy: metrics.confusion.accuracy(),
        roc_auc: roc_auc(scored),
        positives,
        negatives: scored.len() - positives,
    };

    log::info!(
        "Threshold {:.2}: accuracy {:.1}%, sensitivity {:.1}%, specificity {:.1}% over {} samples",
        threshold,
        evaluation.accuracy * 100.0,
        metrics.sensitivity * 100.0,
        metrics.specificity * 100.0,
        scored.len()
    );
    Ok(evaluation)
}

/// Probability that a random positive outscores a random negative (ties count half).
///
/// Computed from rank sums; `None` unless both classes are present.
pub fn roc_auc(scored: &[(f32, Label)]) -> Option<f32> {
    let positives = scored.iter().filter(|(_, l)| l.is_positive()).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<(f32, Label)> = scored.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0f64;
    let mut start = 0;
    while start < sorted.len() {
        let mut end = start;
        while end + 1 < sorted.len() && sorted[end + 1].0 == sorted[start].0 {
            end += 1;
        }
        // ranks are 1-based; tied scores share the mean rank
        let rank = (start + end) as f64 / 2.0 + 1.0;
        let tied_positives = sorted[start..=end]
            .iter()
            .filter(|(_, l)| l.is_positive())
            .count();
        positive_rank_sum += rank * tied_positives as f64;
        start = end + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some(((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n)) as f32)
}

/// Fail unless both classes are represented
pub fn check_classes(positives: usize, negatives: usize) -> Result<()> {
    match (positives, negatives) {
        (0, 0) => Err(PipelineError::InsufficientCalibrationData(
            "calibration set is empty".to_string(),
        )),
        (0, n) => Err(PipelineError::InsufficientCalibrationData(format!(
            "only negative samples ({n}), need at least one positive"
        ))),
        (p, 0) => Err(PipelineError::InsufficientCalibrationData(format!(
            "only positive samples ({p}), need at least one negative"
        ))),
        _ => Ok(()),
    }
}

/// Keep at most `max_per_class` samples of each label, preserving input order
pub fn cap_per_class(
    samples: &[LabeledSample],
    max_per_class: Option<usize>,
) -> Vec<&LabeledSample> {
    let Some(max) = max_per_class else {
        return samples.iter().collect();
    };
    let (mut positives, mut negatives) = (0usize, 0usize);
    samples
        .iter()
        .filter(|s| {
            let seen = match s.label {
                Label::Positive => &mut positives,
                Label::Negative => &mut negatives,
            };
            *seen += 1;
            *seen <= max
        })
        .collect()
}

/// Pick the candidate maximizing Youden's J over already-scored samples.
///
/// `candidates` are swept in ascending order whatever order they are given in; on a tie
/// the lowest threshold wins.
pub fn select_threshold(scored: &[(f32, Label)], candidates: &[f32]) -> Result<CalibrationResult> {
    let positives = scored.iter().filter(|(_, l)| l.is_positive()).count();
    let negatives = scored.len() - positives;
    check_classes(positives, negatives)?;

    if let Some((score, _)) = scored.iter().find(|(s, _)| !(0.0..=1.0).contains(s)) {
        return Err(PipelineError::InvariantViolation(format!(
            "calibration score {score} outside [0, 1]"
        )));
    }
    if candidates.is_empty() {
        return Err(PipelineError::InvalidParameter(
            "no candidate thresholds to evaluate".to_string(),
        ));
    }
    if let Some(bad) = candidates.iter().find(|t| !(0.0..=1.0).contains(*t)) {
        return Err(PipelineError::InvalidParameter(format!(
            "candidate threshold {bad} outside [0, 1]"
        )));
    }

    let mut ascending = candidates.to_vec();
    ascending.sort_by(f32::total_cmp);

    let sweep: Vec<ThresholdMetrics> = ascending
        .iter()
        .map(|&t| ThresholdMetrics::evaluate(scored, t))
        .collect();

    let mut best = sweep[0];
    for metrics in &sweep[1..] {
        if metrics.youden_j > best.youden_j {
            best = *metrics;
        }
    }

    log::info!(
        "Selected threshold {:.2} (J={:.3}, sensitivity={:.1}%, specificity={:.1}%) from {} positives / {} negatives",
        best.threshold,
        best.youden_j,
        best.sensitivity * 100.0,
        best.specificity * 100.0,
        positives,
        negatives
    );

    Ok(CalibrationResult {
        threshold: best.threshold,
        sensitivity: best.sensitivity,
        specificity: best.specificity,
        youden_j: best.youden_j,
        positives,
        negatives,
        sweep,
        calibrated_at: OffsetDateTime::now_utc(),
    })
}
