#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from tumorscan for tests
pub use tumorscan::{
    CalibrationConfig, CalibrationResult, ConfidenceLevel, Diagnosis, Label, LabeledSample,
    NormalizeConfig, NormalizedTensor, Pipeline, PipelineConfig, PipelineError, RawImage,
    ViewTransform,
};
