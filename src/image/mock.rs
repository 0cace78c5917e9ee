use super::ImageService;
use crate::models::{Dimensions, NormalizedImage};
use crate::{Error, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Which stage the mock should fail in, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Decode,
    Encode,
}

#[derive(Clone)]
pub struct MockImageProcessor {
    load_count: Arc<Mutex<usize>>,
    encode_count: Arc<Mutex<usize>>,
    seen_sources: Arc<Mutex<Vec<PathBuf>>>,
    failure: Arc<Mutex<Option<MockFailure>>>,
    decode_delay: Duration,
    encode_delay: Duration,
}

impl MockImageProcessor {
    pub fn new() -> Self {
        Self {
            load_count: Arc::new(Mutex::new(0)),
            encode_count: Arc::new(Mutex::new(0)),
            seen_sources: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(Mutex::new(None)),
            decode_delay: Duration::ZERO,
            encode_delay: Duration::ZERO,
        }
    }

    pub fn with_failure(self, failure: MockFailure) -> Self {
        *self.failure.lock().unwrap() = Some(failure);
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn with_encode_delay(mut self, delay: Duration) -> Self {
        self.encode_delay = delay;
        self
    }

    pub fn get_load_count(&self) -> usize {
        *self.load_count.lock().unwrap()
    }

    pub fn get_encode_count(&self) -> usize {
        *self.encode_count.lock().unwrap()
    }

    /// Source paths handed to `load_letterboxed`, in call order.
    pub fn get_seen_sources(&self) -> Vec<PathBuf> {
        self.seen_sources.lock().unwrap().clone()
    }
}

impl Default for MockImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageService for MockImageProcessor {
    async fn load_letterboxed(&self, source: &Path, target: Dimensions) -> Result<RgbImage> {
        *self.load_count.lock().unwrap() += 1;
        self.seen_sources
            .lock()
            .unwrap()
            .push(source.to_path_buf());

        if !self.decode_delay.is_zero() {
            tokio::time::sleep(self.decode_delay).await;
        }

        if *self.failure.lock().unwrap() == Some(MockFailure::Decode) {
            return Err(Error::Decode("Mock decode failure".to_string()));
        }

        Ok(RgbImage::from_pixel(
            target.width,
            target.height,
            Rgb([255, 255, 255]),
        ))
    }

    async fn encode_jpeg(&self, canvas: RgbImage, quality: u8) -> Result<NormalizedImage> {
        *self.encode_count.lock().unwrap() += 1;

        if !self.encode_delay.is_zero() {
            tokio::time::sleep(self.encode_delay).await;
        }

        if *self.failure.lock().unwrap() == Some(MockFailure::Encode) {
            return Err(Error::Encode("Mock encode failure".to_string()));
        }

        Ok(NormalizedImage {
            dimensions: Dimensions::new(canvas.width(), canvas.height()),
            content_type: "image/jpeg",
            bytes: vec![0xFF, 0xD8, 0xFF, quality],
        })
    }
}
