use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, Rgb32FImage, RgbImage};
use imageproc::contrast::equalize_histogram;

use crate::error::{PipelineError, Result};
use crate::preprocessing::clahe;

pub type GrayF32Image = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Image flowing between normalization steps
#[derive(Debug, Clone)]
pub enum StageImage {
    Rgb(RgbImage),
    Gray(GrayImage),
    GrayF32(GrayF32Image),
    RgbF32(Rgb32FImage),
}

impl StageImage {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            StageImage::Rgb(img) => img.dimensions(),
            StageImage::Gray(img) => img.dimensions(),
            StageImage::GrayF32(img) => img.dimensions(),
            StageImage::RgbF32(img) => img.dimensions(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StageImage::Rgb(_) => "rgb8",
            StageImage::Gray(_) => "gray8",
            StageImage::GrayF32(_) => "gray32f",
            StageImage::RgbF32(_) => "rgb32f",
        }
    }

    /// 8-bit rendering, used for debug dumps
    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            StageImage::Rgb(img) => DynamicImage::ImageRgb8(img.clone()),
            StageImage::Gray(img) => DynamicImage::ImageLuma8(img.clone()),
            StageImage::GrayF32(img) => {
                let bytes = GrayImage::from_fn(img.width(), img.height(), |x, y| {
                    Luma([(img.get_pixel(x, y)[0] * 255.0).round().clamp(0.0, 255.0) as u8])
                });
                DynamicImage::ImageLuma8(bytes)
            }
            StageImage::RgbF32(img) => {
                DynamicImage::ImageRgb8(DynamicImage::ImageRgb32F(img.clone()).to_rgb8())
            }
        }
    }
}

fn unexpected(step: &str, got: &StageImage) -> PipelineError {
    PipelineError::InvariantViolation(format!(
        "{} received a {} image it cannot process",
        step,
        got.kind()
    ))
}

/// One deterministic transform in the normalization chain
pub trait NormalizeStep: Send + Sync {
    fn process(&self, input: StageImage) -> Result<StageImage>;

    /// Human-readable name (used for logging and debug directories)
    fn name(&self) -> &str;
}

/// Remove a symmetric border of `margin` (fraction of each dimension) from every edge
pub struct CropMarginStep {
    pub margin: f32,
}

impl NormalizeStep for CropMarginStep {
    fn process(&self, input: StageImage) -> Result<StageImage> {
        let img = match input {
            StageImage::Rgb(img) => img,
            other => return Err(unexpected(self.name(), &other)),
        };
        if !(0.0..0.5).contains(&self.margin) {
            return Err(PipelineError::InvalidParameter(format!(
                "crop margin must be in [0, 0.5), got {}",
                self.margin
            )));
        }

        let (width, height) = img.dimensions();
        let margin_w = (width as f32 * self.margin) as u32;
        let margin_h = (height as f32 * self.margin) as u32;
        let crop_w = width.saturating_sub(2 * margin_w);
        let crop_h = height.saturating_sub(2 * margin_h);
        if crop_w == 0 || crop_h == 0 {
            return Err(PipelineError::InvalidParameter(format!(
                "cropping {width}x{height} by {} leaves nothing",
                self.margin
            )));
        }

        let cropped = imageops::crop_imm(&img, margin_w, margin_h, crop_w, crop_h).to_image();
        Ok(StageImage::Rgb(cropped))
    }

    fn name(&self) -> &str {
        "Crop Margin"
    }
}

// BT.601 weights in 14-bit fixed point, rounding like OpenCV's RGB2GRAY
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// BT.601 luma of one RGB pixel
pub fn luma(Rgb([r, g, b]): Rgb<u8>) -> u8 {
    let weighted = LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32;
    ((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
}

/// RGB to single-channel luma
pub struct GrayscaleStep;

impl NormalizeStep for GrayscaleStep {
    fn process(&self, input: StageImage) -> Result<StageImage> {
        match input {
            StageImage::Rgb(img) => Ok(StageImage::Gray(GrayImage::from_fn(
                img.width(),
                img.height(),
                |x, y| Luma([luma(*img.get_pixel(x, y))]),
            ))),
            StageImage::Gray(img) => Ok(StageImage::Gray(img)),
            other => Err(unexpected(self.name(), &other)),
        }
    }

    fn name(&self) -> &str {
        "Grayscale"
    }
}

/// CLAHE, falling back to global histogram equalization when the adaptive pass
/// cannot run on this image. Equalization is never skipped.
pub struct EqualizeStep {
    pub tiles: u32,
    pub clip_limit: f32,
}

impl NormalizeStep for EqualizeStep {
    fn process(&self, input: StageImage) -> Result<StageImage> {
        let img = match input {
            StageImage::Gray(img) => img,
            other => return Err(unexpected(self.name(), &other)),
        };

        let equalized = match clahe::clahe(&img, self.tiles, self.clip_limit) {
            Some(out) => out,
            None => {
                log::debug!(
                    "CLAHE unavailable for {}x{} with {} tiles, using global equalization",
                    img.width(),
                    img.height(),
                    self.tiles
                );
                equalize_histogram(&img)
            }
        };
        Ok(StageImage::Gray(equalized))
    }

    fn name(&self) -> &str {
        "Equalize"
    }
}

/// `[0, 255]` to `[0.0, 1.0]`
pub struct RescaleStep;

impl NormalizeStep for RescaleStep {
    fn process(&self, input: StageImage) -> Result<StageImage> {
        let img = match input {
            StageImage::Gray(img) => img,
            other => return Err(unexpected(self.name(), &other)),
        };
        let scaled = GrayF32Image::from_fn(img.width(), img.height(), |x, y| {
            Luma([img.get_pixel(x, y)[0] as f32 / 255.0])
        });
        Ok(StageImage::GrayF32(scaled))
    }

    fn name(&self) -> &str {
        "Rescale"
    }
}

/// Copy the single channel into R, G and B
pub struct ReplicateChannelsStep;

impl NormalizeStep for ReplicateChannelsStep {
    fn process(&self, input: StageImage) -> Result<StageImage> {
        let img = match input {
            StageImage::GrayF32(img) => img,
            other => return Err(unexpected(self.name(), &other)),
        };
        let rgb = Rgb32FImage::from_fn(img.width(), img.height(), |x, y| {
            let v = img.get_pixel(x, y)[0];
            Rgb([v, v, v])
        });
        Ok(StageImage::RgbF32(rgb))
    }

    fn name(&self) -> &str {
        "Replicate Channels"
    }
}

/// Bilinear resize to the fixed model input size
pub struct ResizeStep {
    pub width: u32,
    pub height: u32,
}

impl NormalizeStep for ResizeStep {
    fn process(&self, input: StageImage) -> Result<StageImage> {
        let img = match input {
            StageImage::RgbF32(img) => img,
            other => return Err(unexpected(self.name(), &other)),
        };
        if img.dimensions() == (self.width, self.height) {
            return Ok(StageImage::RgbF32(img));
        }
        let resized = imageops::resize(&img, self.width, self.height, FilterType::Triangle);
        Ok(StageImage::RgbF32(resized))
    }

    fn name(&self) -> &str {
        "Resize"
    }
}
