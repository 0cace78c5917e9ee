//! Image decoding, letterboxing and re-encoding
//!
//! Turns an arbitrary uploaded image into a fixed-size JPEG canvas so that
//! every stored tile has identical pixel dimensions.

pub mod mock;
pub mod processor;

pub use mock::MockImageProcessor;
pub use processor::{fit_scale, letterbox, scaled_size, ImageProcessor};

use crate::models::{Dimensions, NormalizedImage};
use crate::Result;
use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;

#[async_trait]
pub trait ImageService: Send + Sync {
    /// Decode the file at `source` and letterbox it onto a `target`-sized white canvas.
    async fn load_letterboxed(&self, source: &Path, target: Dimensions) -> Result<RgbImage>;

    /// Encode a canvas as JPEG at `quality` (1-100).
    async fn encode_jpeg(&self, canvas: RgbImage, quality: u8) -> Result<NormalizedImage>;
}
