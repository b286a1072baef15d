use std::path::Path;

use anyhow::{Context, bail};
use rten::Model;
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, Tensor};

use crate::models::NormalizedTensor;
use crate::scoring::Scorer;

/// Memory layout the model expects for its `[1, ...]` input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, height, width, 3]`, as exported from Keras
    #[default]
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

impl std::str::FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nhwc" => Ok(TensorLayout::Nhwc),
            "nchw" => Ok(TensorLayout::Nchw),
            _ => Err(format!("Unknown tensor layout: {s}")),
        }
    }
}

/// Scorer backed by a `.rten` classifier
pub struct ModelScorer {
    model: Model,
    layout: TensorLayout,
    name: String,
}

impl ModelScorer {
    pub fn load(path: impl AsRef<Path>, layout: TensorLayout) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Model not found: {}", path.display());
        }
        let model = Model::load_file(path)
            .with_context(|| format!("Failed to load model {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        Ok(Self {
            model,
            layout,
            name,
        })
    }
}

impl Scorer for ModelScorer {
    fn score(&self, tensor: &NormalizedTensor) -> anyhow::Result<f32> {
        let (h, w, c) = tensor.shape();
        let input = match self.layout {
            TensorLayout::Nhwc => NdTensor::from_data([1, h, w, c], tensor.as_slice().to_vec()),
            TensorLayout::Nchw => NdTensor::from_data([1, c, h, w], tensor.to_chw()),
        };

        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| anyhow::anyhow!("Inference failed: {e}"))?;
        let output: Tensor<f32> = output
            .try_into()
            .map_err(|e| anyhow::anyhow!("Model output is not f32: {e:?}"))?;

        positive_probability(&output.to_vec())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reduce a model's raw output row to the positive-class probability.
///
/// A single output is a sigmoid probability; two outputs are softmax `[normal, tumor]`.
pub fn positive_probability(outputs: &[f32]) -> anyhow::Result<f32> {
    match outputs {
        [p] => Ok(*p),
        [_, tumor] => Ok(*tumor),
        other => bail!(
            "Expected 1 (sigmoid) or 2 (softmax) outputs, got {}",
            other.len()
        ),
    }
}
