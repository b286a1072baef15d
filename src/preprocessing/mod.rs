pub mod clahe;
pub mod steps;

use crate::config::NormalizeConfig;
use crate::error::{PipelineError, Result};
use crate::models::{NormalizedTensor, RawImage};
use crate::pipeline::DebugConfig;
use steps::*;

/// Raw image to model-ready tensor: crop, grayscale, equalize, rescale, replicate, resize.
///
/// Deterministic: the same image under the same config always yields bit-identical output.
pub struct Normalizer {
    steps: Vec<Box<dyn NormalizeStep>>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            steps: vec![
                Box::new(CropMarginStep {
                    margin: config.crop_margin,
                }),
                Box::new(GrayscaleStep),
                Box::new(EqualizeStep {
                    tiles: config.clahe_tiles,
                    clip_limit: config.clip_limit,
                }),
                Box::new(RescaleStep),
                Box::new(ReplicateChannelsStep),
                Box::new(ResizeStep {
                    width: config.target_width,
                    height: config.target_height,
                }),
            ],
        })
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name())
    }

    pub fn normalize(&self, raw: &RawImage) -> Result<NormalizedTensor> {
        self.run(raw, None)
    }

    /// Run every step, writing each intermediate image when `debug` is set
    pub fn run(&self, raw: &RawImage, debug: Option<&DebugConfig>) -> Result<NormalizedTensor> {
        if raw.width() == 0 || raw.height() == 0 {
            return Err(PipelineError::InvalidParameter(
                "cannot normalize an empty image".to_string(),
            ));
        }

        let mut data = StageImage::Rgb(raw.as_rgb().clone());
        for (idx, step) in self.steps.iter().enumerate() {
            data = step.process(data)?;
            let (w, h) = data.dimensions();
            log::debug!("{}: {}x{}", step.name(), w, h);

            if let Some(debug) = debug {
                debug.save_stage(idx + 1, step.name(), "01.png", &data.to_dynamic())?;
            }
        }

        match data {
            StageImage::RgbF32(img) => Ok(NormalizedTensor::from_image(img)),
            _ => Err(PipelineError::InvariantViolation(
                "normalization did not end in a 3-channel float image".to_string(),
            )),
        }
    }
}

/// One-shot normalization with the given parameters
pub fn normalize(raw: &RawImage, config: &NormalizeConfig) -> Result<NormalizedTensor> {
    Normalizer::new(config)?.normalize(raw)
}
