//! Pipeline configuration.
//!
//! Every section has defaults matching the reference preprocessing (10% crop margin, 128x128
//! target, 8x8 CLAHE tiles with clip limit 2.0, 26 candidate thresholds over [0.30, 0.80]).
//! A TOML file may override any subset of fields; the CLI then overrides the file.
//!
//! No decision threshold lives here: callers supply one explicitly or load a calibration result.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub normalize: NormalizeConfig,
    pub tta: TtaConfig,
    pub calibration: CalibrationConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PipelineError::InvalidParameter(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.normalize.validate()?;
        self.tta.validate()?;
        self.calibration.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Fraction cropped from each edge, in `[0, 0.5)`
    pub crop_margin: f32,
    pub target_width: u32,
    pub target_height: u32,
    /// CLAHE tile grid (tiles per axis)
    pub clahe_tiles: u32,
    pub clip_limit: f32,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            crop_margin: 0.10,
            target_width: 128,
            target_height: 128,
            clahe_tiles: 8,
            clip_limit: 2.0,
        }
    }
}

impl NormalizeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..0.5).contains(&self.crop_margin) {
            return Err(PipelineError::InvalidParameter(format!(
                "crop margin must be in [0, 0.5), got {}",
                self.crop_margin
            )));
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "target size must be non-zero, got {}x{}",
                self.target_width, self.target_height
            )));
        }
        if self.clahe_tiles == 0 {
            return Err(PipelineError::InvalidParameter(
                "CLAHE tile grid must be at least 1x1".to_string(),
            ));
        }
        if self.clip_limit.is_nan() || self.clip_limit <= 0.0 {
            return Err(PipelineError::InvalidParameter(format!(
                "clip limit must be positive, got {}",
                self.clip_limit
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtaConfig {
    /// Score the views concurrently
    pub parallel: bool,
    /// Worker threads for scoring; `None` uses the global rayon pool
    pub threads: Option<usize>,
}

impl Default for TtaConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            threads: None,
        }
    }
}

impl TtaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(PipelineError::InvalidParameter(
                "thread count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub range_start: f32,
    pub range_end: f32,
    /// Number of evenly spaced candidates, endpoints included
    pub steps: usize,
    /// Cap on samples scored per class; `None` scores everything
    pub max_per_class: Option<usize>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            range_start: 0.30,
            range_end: 0.80,
            steps: 26,
            max_per_class: Some(80),
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.range_start) || !in_unit(self.range_end) {
            return Err(PipelineError::InvalidParameter(format!(
                "threshold range must lie in [0, 1], got [{}, {}]",
                self.range_start, self.range_end
            )));
        }
        if self.range_start > self.range_end {
            return Err(PipelineError::InvalidParameter(format!(
                "threshold range is reversed: [{}, {}]",
                self.range_start, self.range_end
            )));
        }
        if self.steps == 0 {
            return Err(PipelineError::InvalidParameter(
                "at least one candidate threshold is required".to_string(),
            ));
        }
        if self.max_per_class == Some(0) {
            return Err(PipelineError::InvalidParameter(
                "per-class sample cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Evenly spaced candidates over `[range_start, range_end]`, ascending
    pub fn candidates(&self) -> Vec<f32> {
        if self.steps == 1 {
            return vec![self.range_start];
        }
        let start = self.range_start as f64;
        let span = self.range_end as f64 - start;
        let last = (self.steps - 1) as f64;
        (0..self.steps)
            .map(|i| (start + span * i as f64 / last) as f32)
            .collect()
    }
}
