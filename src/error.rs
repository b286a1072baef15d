use std::path::PathBuf;

use crate::tta::ViewTransform;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Everything the diagnosis and calibration paths can fail with.
///
/// None of these are retried internally: each is either malformed input or a broken
/// external dependency, and all of them surface to the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("insufficient calibration data: {0}")]
    InsufficientCalibrationData(String),

    #[error("scorer failed on {view} view")]
    ScorerInvocation {
        view: ViewTransform,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Limits(limits) => Self::Resource(limits.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}
