use std::fmt;

use image::imageops;
use serde::{Deserialize, Serialize};

use crate::models::NormalizedTensor;

/// The closed set of test-time transforms: identity, both flips, and the three
/// counterclockwise quarter-turn rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewTransform {
    Identity,
    FlipHorizontal,
    FlipVertical,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl ViewTransform {
    pub const ALL: [ViewTransform; 6] = [
        ViewTransform::Identity,
        ViewTransform::FlipHorizontal,
        ViewTransform::FlipVertical,
        ViewTransform::Rotate90,
        ViewTransform::Rotate180,
        ViewTransform::Rotate270,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ViewTransform::Identity => "identity",
            ViewTransform::FlipHorizontal => "flip_horizontal",
            ViewTransform::FlipVertical => "flip_vertical",
            ViewTransform::Rotate90 => "rotate_90",
            ViewTransform::Rotate180 => "rotate_180",
            ViewTransform::Rotate270 => "rotate_270",
        }
    }

    pub fn apply(self, tensor: &NormalizedTensor) -> NormalizedTensor {
        let img = tensor.as_image();
        // imageops rotates clockwise
        let out = match self {
            ViewTransform::Identity => img.clone(),
            ViewTransform::FlipHorizontal => imageops::flip_horizontal(img),
            ViewTransform::FlipVertical => imageops::flip_vertical(img),
            ViewTransform::Rotate90 => imageops::rotate270(img),
            ViewTransform::Rotate180 => imageops::rotate180(img),
            ViewTransform::Rotate270 => imageops::rotate90(img),
        };
        NormalizedTensor::from_image(out)
    }
}

impl fmt::Display for ViewTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A normalized tensor under one of the test-time transforms
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedView {
    pub transform: ViewTransform,
    pub tensor: NormalizedTensor,
}

/// All six views of `tensor`, in [`ViewTransform::ALL`] order.
///
/// Exhaustive and deterministic; this is not random training-time augmentation.
pub fn expand(tensor: &NormalizedTensor) -> Vec<AugmentedView> {
    ViewTransform::ALL
        .iter()
        .map(|&transform| AugmentedView {
            transform,
            tensor: transform.apply(tensor),
        })
        .collect()
}
