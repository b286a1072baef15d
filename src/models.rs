use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageReader, Rgb32FImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A decoded input image: 3 channels, 8 bits each.
///
/// Cloning is cheap; the pixel buffer is shared and never mutated after loading.
#[derive(Debug, Clone)]
pub struct RawImage {
    pixels: Arc<RgbImage>,
}

impl RawImage {
    /// Decode an in-memory image (format sniffed from the content)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let img = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode(e.to_string()))?
            .decode()?;
        Ok(Self::from_dynamic(img))
    }

    /// Load and decode an image file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = ImageReader::open(path)
            .map_err(|e| PipelineError::io(path, e))?
            .with_guessed_format()
            .map_err(|e| PipelineError::io(path, e))?
            .decode()
            .map_err(|e| match PipelineError::from(e) {
                PipelineError::Decode(msg) => {
                    PipelineError::Decode(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })?;
        Ok(Self::from_dynamic(img))
    }

    /// Wrap an already decoded image, dropping alpha and widening grayscale to RGB
    pub fn from_dynamic(img: DynamicImage) -> Self {
        let pixels = match img {
            DynamicImage::ImageRgb8(rgb) => rgb,
            other => other.to_rgb8(),
        };
        Self::from_rgb(pixels)
    }

    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Fixed-size, contrast-normalized, pseudo-RGB tensor in `[0, 1]`, laid out HWC.
#[derive(Clone, PartialEq)]
pub struct NormalizedTensor {
    image: Rgb32FImage,
}

impl NormalizedTensor {
    pub fn from_image(image: Rgb32FImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.image.height() as usize, self.image.width() as usize, 3)
    }

    pub fn get(&self, x: u32, y: u32) -> [f32; 3] {
        self.image.get_pixel(x, y).0
    }

    pub fn as_image(&self) -> &Rgb32FImage {
        &self.image
    }

    /// Interleaved HWC samples
    pub fn as_slice(&self) -> &[f32] {
        self.image.as_raw()
    }

    /// Planar CHW copy of the samples
    pub fn to_chw(&self) -> Vec<f32> {
        let plane = (self.image.width() * self.image.height()) as usize;
        let mut out = vec![0.0f32; plane * 3];
        for (i, px) in self.image.pixels().enumerate() {
            out[i] = px.0[0];
            out[plane + i] = px.0[1];
            out[2 * plane + i] = px.0[2];
        }
        out
    }
}

impl fmt::Debug for NormalizedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedTensor")
            .field("shape", &self.shape())
            .finish()
    }
}

/// Binary ground truth / decision. Positive means "tumor present".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Negative,
    Positive,
}

impl Label {
    pub fn is_positive(self) -> bool {
        matches!(self, Label::Positive)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Negative => write!(f, "negative"),
            Label::Positive => write!(f, "positive"),
        }
    }
}

/// Coarse band of the confidence value, for human-facing reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Moderate,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.9 {
            ConfidenceLevel::VeryHigh
        } else if confidence >= 0.7 {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::Moderate
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceLevel::Moderate => write!(f, "moderate"),
            ConfidenceLevel::High => write!(f, "high"),
            ConfidenceLevel::VeryHigh => write!(f, "very high"),
        }
    }
}

/// Outcome of one diagnosis request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Aggregated positive-class probability
    pub score: f32,
    pub threshold: f32,
    pub label: Label,
    /// Probability mass of the chosen label, always >= 0.5
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.label {
            Label::Positive => "tumor detected",
            Label::Negative => "normal tissue",
        };
        write!(
            f,
            "{} (probability {:.1}%, confidence {:.1}% [{}], threshold {:.2})",
            verdict,
            self.score * 100.0,
            self.confidence * 100.0,
            self.confidence_level,
            self.threshold
        )
    }
}

/// One calibration item
#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub image: RawImage,
    pub label: Label,
    /// Where the image came from, if it was loaded from disk
    pub source: Option<PathBuf>,
}

impl LabeledSample {
    pub fn new(image: RawImage, label: Label) -> Self {
        Self {
            image,
            label,
            source: None,
        }
    }
}
