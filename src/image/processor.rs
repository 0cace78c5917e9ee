use super::ImageService;
use crate::models::{Dimensions, NormalizedImage};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Uniform scale that fits `source` inside `target`.
pub fn fit_scale(source: Dimensions, target: Dimensions) -> f64 {
    let horizontal = f64::from(target.width) / f64::from(source.width);
    let vertical = f64::from(target.height) / f64::from(source.height);
    horizontal.min(vertical)
}

/// Size of the scaled content, never larger than `target` on either axis.
pub fn scaled_size(source: Dimensions, target: Dimensions) -> Dimensions {
    let scale = fit_scale(source, target);
    let width = (f64::from(source.width) * scale).round() as u32;
    let height = (f64::from(source.height) * scale).round() as u32;
    Dimensions::new(width.clamp(1, target.width), height.clamp(1, target.height))
}

/// Scale `image` to fit `target`, centered on a white canvas of exactly `target` size.
///
/// Transparent source pixels are composited over the white background.
pub fn letterbox(image: &DynamicImage, target: Dimensions) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::from_pixel(target.width, target.height, Rgb([255, 255, 255]));
    }

    let source = Dimensions::new(image.width(), image.height());
    let scaled = scaled_size(source, target);
    let content = image
        .resize_exact(scaled.width, scaled.height, FilterType::Lanczos3)
        .to_rgba8();

    let mut canvas = RgbaImage::from_pixel(target.width, target.height, BACKGROUND);
    let x = (target.width - scaled.width) / 2;
    let y = (target.height - scaled.height) / 2;
    imageops::overlay(&mut canvas, &content, i64::from(x), i64::from(y));

    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    fn load_letterboxed_sync(source: PathBuf, target: Dimensions) -> Result<RgbImage> {
        let decoded = ImageReader::open(&source)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| Error::Decode(e.to_string()))?;

        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(Error::Decode("Image has no pixels".to_string()));
        }

        Ok(letterbox(&decoded, target))
    }

    fn encode_jpeg_sync(canvas: RgbImage, quality: u8) -> Result<NormalizedImage> {
        let dimensions = Dimensions::new(canvas.width(), canvas.height());
        let mut bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
        canvas
            .write_with_encoder(encoder)
            .map_err(|e| Error::Encode(e.to_string()))?;

        Ok(NormalizedImage {
            dimensions,
            content_type: "image/jpeg",
            bytes,
        })
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageService for ImageProcessor {
    async fn load_letterboxed(&self, source: &Path, target: Dimensions) -> Result<RgbImage> {
        tokio::task::spawn_blocking({
            let source = source.to_path_buf();
            move || Self::load_letterboxed_sync(source, target)
        })
        .await
        .map_err(|e| Error::Invariant(format!("Image decode task join error: {}", e)))?
    }

    async fn encode_jpeg(&self, canvas: RgbImage, quality: u8) -> Result<NormalizedImage> {
        tokio::task::spawn_blocking(move || Self::encode_jpeg_sync(canvas, quality))
            .await
            .map_err(|e| Error::Invariant(format!("Image encode task join error: {}", e)))?
    }
}
