//! Per-sample transforms applied by the dataset views.

use crate::common::*;

/// A pure function applied to each sample tensor at access time.
pub type Transform = Arc<dyn Fn(Tensor) -> Result<Tensor> + Send + Sync>;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The default input size of the Inception v3 encoder.
pub const DEFAULT_IMAGE_SIZE: i64 = 299;

pub fn identity() -> Transform {
    Arc::new(|input: Tensor| -> Result<Tensor> { Ok(input) })
}

/// Resize a `[3, H, W]` uint8 image to a square and normalize it with
/// ImageNet statistics.
pub fn resize_and_normalize(size: i64) -> Transform {
    Arc::new(move |image: Tensor| {
        let resized = vision::image::resize(&image, size, size)?;
        let mean = Tensor::of_slice(&IMAGENET_MEAN).view([3, 1, 1]);
        let std = Tensor::of_slice(&IMAGENET_STD).view([3, 1, 1]);
        let normalized = (resized.to_kind(Kind::Float) / 255.0 - mean) / std;
        Ok(normalized)
    })
}

pub(crate) fn apply(transform: &Option<Transform>, input: Tensor) -> Result<Tensor> {
    match transform {
        Some(transform) => transform(input),
        None => Ok(input),
    }
}
