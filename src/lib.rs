pub mod calibration;
pub mod config;
pub mod decision;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod preprocessing;
pub mod report;
pub mod scoring;
pub mod tta;

pub use calibration::{CalibrationResult, ConfusionCounts, Evaluation, ThresholdMetrics};
pub use config::{CalibrationConfig, NormalizeConfig, PipelineConfig, TtaConfig};
pub use decision::decide;
pub use error::{PipelineError, Result};
pub use models::{ConfidenceLevel, Diagnosis, Label, LabeledSample, NormalizedTensor, RawImage};
pub use pipeline::{DebugConfig, Pipeline, calibrate, diagnose};
pub use preprocessing::{Normalizer, normalize};
pub use report::DiagnosisRecord;
pub use scoring::{FnScorer, ScoreAggregator, Scorer, aggregate};
pub use tta::{AugmentedView, ViewTransform, expand};

#[cfg(feature = "model")]
pub use scoring::model::{ModelScorer, TensorLayout};
