use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, Rgb32FImage, RgbImage};
use tumorscan::{FnScorer, Label, LabeledSample, NormalizedTensor, PipelineConfig, RawImage, Scorer};

/// Creates a uniformly colored RGB image
pub fn uniform_image(width: u32, height: u32, value: u8) -> RawImage {
    RawImage::from_rgb(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
}

/// Creates an RGB gradient (red along x, green along y)
pub fn gradient_image(width: u32, height: u32) -> RawImage {
    RawImage::from_rgb(RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    }))
}

/// Square tensor whose every pixel value is unique, so no flip or rotation maps it onto itself
pub fn asymmetric_tensor(size: u32) -> NormalizedTensor {
    let total = (size * size) as f32;
    NormalizedTensor::from_image(Rgb32FImage::from_fn(size, size, |x, y| {
        let v = (y * size + x) as f32 / total;
        Rgb([v, v, v])
    }))
}

pub fn black_tensor(size: u32) -> NormalizedTensor {
    NormalizedTensor::from_image(Rgb32FImage::from_pixel(size, size, Rgb([0.0, 0.0, 0.0])))
}

pub fn mean_intensity(tensor: &NormalizedTensor) -> f32 {
    let data = tensor.as_slice();
    data.iter().sum::<f32>() / data.len() as f32
}

/// Scores bright tensors as tumors: 0.95 above mid-gray, 0.05 below
pub fn brightness_scorer() -> Arc<dyn Scorer> {
    Arc::new(FnScorer::new("brightness", |t: &NormalizedTensor| {
        Ok(if mean_intensity(t) > 0.5 { 0.95 } else { 0.05 })
    }))
}

pub fn constant_scorer(value: f32) -> Arc<dyn Scorer> {
    Arc::new(FnScorer::new("constant", move |_: &NormalizedTensor| Ok(value)))
}

/// Scorer that counts its calls and fails on call number `fail_on` (1-based), if any
pub struct CountingScorer {
    pub calls: AtomicUsize,
    pub fail_on: Option<usize>,
    pub value: f32,
}

impl CountingScorer {
    pub fn new(value: f32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
            value,
        }
    }

    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Self::new(0.5)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scorer for CountingScorer {
    fn score(&self, _tensor: &NormalizedTensor) -> anyhow::Result<f32> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(n) {
            anyhow::bail!("simulated inference failure on call {n}");
        }
        Ok(self.value)
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// `positives` bright and `negatives` dark images, interleaved
pub fn labeled_set(positives: usize, negatives: usize) -> Vec<LabeledSample> {
    let mut samples = Vec::new();
    for i in 0..positives.max(negatives) {
        if i < positives {
            samples.push(LabeledSample::new(uniform_image(64, 64, 200), Label::Positive));
        }
        if i < negatives {
            samples.push(LabeledSample::new(uniform_image(64, 64, 40), Label::Negative));
        }
    }
    samples
}

/// Default config with a small target size to keep tests fast
pub fn small_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.normalize.target_width = 32;
    config.normalize.target_height = 32;
    config
}
