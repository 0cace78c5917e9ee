//! Image normalization and upload pipeline
//!
//! Validates a user-selected file, letterboxes it onto a fixed-size canvas,
//! re-encodes it as JPEG and writes it to the blob store. Each phase runs
//! under its own deadline and every failure is classified (see
//! [`crate::error::ErrorKind`]). A pipeline instance runs at most one upload
//! at a time; a second caller is turned away rather than queued.

use crate::error::UploadPhase;
use crate::image::ImageService;
use crate::models::{PipelineConfig, SourceFile, StorageReference, TileFormat};
use crate::storage::BlobStore;
use crate::{Error, Result};
use chrono::Utc;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UploadState {
    Idle = 0,
    InFlight = 1,
}

impl UploadState {
    fn from_raw(raw: u8) -> Self {
        if raw == UploadState::InFlight as u8 {
            UploadState::InFlight
        } else {
            UploadState::Idle
        }
    }
}

/// Returns the pipeline to `Idle` when dropped, including on cancellation.
struct FlightGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.state.store(UploadState::Idle as u8, Ordering::Release);
    }
}

/// Staged copy of the source bytes on disk, removed when dropped.
struct SourcePreview {
    file: NamedTempFile,
}

impl SourcePreview {
    fn stage(dir: &Path, bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("upload-preview-")
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        debug!("Staged upload preview at {}", file.path().display());
        Ok(Self { file })
    }

    fn path(&self) -> &Path {
        self.file.path()
    }
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Millisecond wall-clock stamp, strictly increasing within the process.
pub fn next_stamp() -> i64 {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_STAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

/// Stored file name for an upload: extension replaced by `.jpg`, anything
/// other than ASCII alphanumerics, `.` and `-` replaced by `_`.
pub fn storage_file_name(original: &str) -> String {
    let base = original
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(original);
    let stem = match base.rfind('.') {
        Some(index) if index + 1 < base.len() => &base[..index],
        _ => base,
    };
    let stem = if base.is_empty() { "image" } else { stem };

    format!("{}.jpg", stem)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<prefix>/<stamp>_<name>`, or `<stamp>_<name>` for an empty prefix.
pub fn destination_path(prefix: &str, stamp: i64, original_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let file_name = format!("{}_{}", stamp, storage_file_name(original_name));
    if prefix.is_empty() {
        file_name
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// Race `operation` against a timer; the operation is dropped if the timer wins.
async fn within<T, F>(phase: UploadPhase, limit: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} phase exceeded {}ms", phase, limit.as_millis());
            Err(Error::Timeout {
                phase,
                after: limit,
            })
        }
    }
}

pub struct UploadPipeline {
    image: Arc<dyn ImageService>,
    store: Arc<dyn BlobStore>,
    config: PipelineConfig,
    state: AtomicU8,
}

impl UploadPipeline {
    pub fn new(image: Arc<dyn ImageService>, store: Arc<dyn BlobStore>, config: PipelineConfig) -> Self {
        Self {
            image,
            store,
            config,
            state: AtomicU8::new(UploadState::Idle as u8),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> UploadState {
        UploadState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Normalize `file` to the configured format and store it under
    /// `destination_prefix`.
    ///
    /// Returns the store-assigned reference only after the write is accepted.
    /// Fails with [`Error::Concurrency`] if another upload on this pipeline is
    /// still running.
    pub async fn normalize_and_upload(
        &self,
        file: SourceFile,
        destination_prefix: &str,
    ) -> Result<StorageReference> {
        self.normalize_and_upload_as(file, destination_prefix, self.config.tile_format())
            .await
    }

    /// Same as [`UploadPipeline::normalize_and_upload`] with an explicit
    /// target size and quality for this call.
    pub async fn normalize_and_upload_as(
        &self,
        file: SourceFile,
        destination_prefix: &str,
        format: TileFormat,
    ) -> Result<StorageReference> {
        let _flight = self.begin()?;
        let name = file.name.clone();

        match self.run(file, destination_prefix, format).await {
            Ok(reference) => {
                info!("Uploaded {} as {}", name, reference);
                Ok(reference)
            }
            Err(e) => {
                warn!("Upload of {} failed ({:?}): {}", name, e.kind(), e);
                Err(e)
            }
        }
    }

    /// Local checks only: media type and size ceiling.
    pub fn validate(&self, file: &SourceFile) -> Result<()> {
        if !file.media_type.to_ascii_lowercase().starts_with("image/") {
            return Err(Error::Validation("Please select an image file".to_string()));
        }
        if file.size() > self.config.max_bytes {
            return Err(Error::Validation(format!(
                "Image size should be at most {} bytes (got {})",
                self.config.max_bytes,
                file.size()
            )));
        }
        Ok(())
    }

    fn check_format(format: TileFormat) -> Result<()> {
        if format.target.width == 0 || format.target.height == 0 {
            return Err(Error::Validation(
                "Target width and height must be non-zero".to_string(),
            ));
        }
        if !(1..=100).contains(&format.quality) {
            return Err(Error::Validation(format!(
                "JPEG quality must be between 1 and 100, got {}",
                format.quality
            )));
        }
        Ok(())
    }

    fn begin(&self) -> Result<FlightGuard<'_>> {
        self.state
            .compare_exchange(
                UploadState::Idle as u8,
                UploadState::InFlight as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| {
                warn!("Rejected upload: another upload is in flight");
                Error::Concurrency
            })?;
        Ok(FlightGuard { state: &self.state })
    }

    async fn run(
        &self,
        file: SourceFile,
        destination_prefix: &str,
        format: TileFormat,
    ) -> Result<StorageReference> {
        Self::check_format(format)?;
        self.validate(&file)?;

        let preview = SourcePreview::stage(&self.config.preview_dir, &file.bytes)?;

        let canvas = within(
            UploadPhase::Decode,
            self.config.decode_timeout,
            self.image.load_letterboxed(preview.path(), format.target),
        )
        .await?;

        let normalized = within(
            UploadPhase::Encode,
            self.config.encode_timeout,
            self.image.encode_jpeg(canvas, format.quality),
        )
        .await?;

        if normalized.dimensions != format.target {
            return Err(Error::Invariant(format!(
                "Normalized image is {}x{}, expected {}x{}",
                normalized.dimensions.width,
                normalized.dimensions.height,
                format.target.width,
                format.target.height
            )));
        }
        debug!(
            "Encoded {} into {} bytes",
            file.name,
            normalized.bytes.len()
        );

        let path = destination_path(destination_prefix, next_stamp(), &file.name);
        within(
            UploadPhase::Upload,
            self.config.upload_timeout,
            self.store
                .put(&path, &normalized.bytes, normalized.content_type),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::mock::MockFailure;
    use crate::image::{ImageProcessor, MockImageProcessor};
    use crate::models::Dimensions;
    use crate::storage::MockBlobStore;
    use crate::ErrorKind;
    use image::{ImageFormat, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn png_file(name: &str, width: u32, height: u32) -> SourceFile {
        SourceFile::new(name, "image/png", png_bytes(width, height))
    }

    struct Harness {
        pipeline: Arc<UploadPipeline>,
        image: MockImageProcessor,
        store: MockBlobStore,
        preview_dir: TempDir,
    }

    impl Harness {
        fn new(image: MockImageProcessor, store: MockBlobStore) -> Self {
            Self::with_config(image, store, |_| {})
        }

        fn with_config(
            image: MockImageProcessor,
            store: MockBlobStore,
            tweak: impl FnOnce(&mut PipelineConfig),
        ) -> Self {
            let preview_dir = TempDir::new().unwrap();
            let mut config = PipelineConfig {
                preview_dir: preview_dir.path().to_path_buf(),
                ..PipelineConfig::default()
            };
            tweak(&mut config);

            let pipeline = Arc::new(UploadPipeline::new(
                Arc::new(image.clone()),
                Arc::new(store.clone()),
                config,
            ));
            Self {
                pipeline,
                image,
                store,
                preview_dir,
            }
        }

        fn preview_files(&self) -> usize {
            std::fs::read_dir(self.preview_dir.path()).unwrap().count()
        }
    }

    #[test]
    fn test_storage_file_name_sanitizes() {
        assert_eq!(storage_file_name("my photo (1).png"), "my_photo__1_.jpg");
        assert_eq!(storage_file_name("archive.tar.gz"), "archive.tar.jpg");
        assert_eq!(storage_file_name("no-extension"), "no-extension.jpg");
        assert_eq!(storage_file_name("C:\\Users\\me\\pic.webp"), "pic.jpg");
        assert_eq!(storage_file_name("café.png"), "caf_.jpg");
        assert_eq!(storage_file_name(""), "image.jpg");
        assert_eq!(storage_file_name(".png"), ".jpg");
        assert_eq!(storage_file_name("trailing."), "trailing..jpg");
    }

    #[test]
    fn test_destination_path_layout() {
        assert_eq!(
            destination_path("projects/", 1700000000000, "a b.png"),
            "projects/1700000000000_a_b.jpg"
        );
        assert_eq!(destination_path("", 5, "a.png"), "5_a.jpg");
    }

    #[test]
    fn test_stamps_strictly_increase() {
        let stamps: Vec<i64> = (0..1000).map(|_| next_stamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_upload_success_writes_once() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());

        let reference = h
            .pipeline
            .normalize_and_upload(png_file("tower.png", 800, 600), "projects")
            .await
            .unwrap();

        assert!(reference.as_str().starts_with("projects/"));
        assert!(reference.as_str().ends_with("_tower.jpg"));
        assert_eq!(h.store.get_put_count(), 1);
        assert_eq!(
            h.store.get_content_type(reference.as_str()).as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(h.pipeline.state(), UploadState::Idle);
        assert_eq!(h.preview_files(), 0);
    }

    #[tokio::test]
    async fn test_non_image_rejected_before_decode() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());
        let file = SourceFile::new("notes.png", "text/plain", b"hello".to_vec());

        let err = h
            .pipeline
            .normalize_and_upload(file, "projects")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.image.get_load_count(), 0);
        assert_eq!(h.store.get_put_count(), 0);
        assert_eq!(h.pipeline.state(), UploadState::Idle);
    }

    #[tokio::test]
    async fn test_size_ceiling_boundary() {
        let exact = png_file("exact.png", 40, 30);
        let ceiling = exact.size();

        let mut over = exact.clone();
        over.bytes.push(0);

        let preview_dir = TempDir::new().unwrap();
        let store = MockBlobStore::new();
        let pipeline = UploadPipeline::new(
            Arc::new(ImageProcessor::new()),
            Arc::new(store.clone()),
            PipelineConfig {
                max_bytes: ceiling,
                preview_dir: preview_dir.path().to_path_buf(),
                ..PipelineConfig::default()
            },
        );

        let err = pipeline
            .normalize_and_upload(over, "projects")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.get_put_count(), 0);

        let reference = pipeline
            .normalize_and_upload(exact, "projects")
            .await
            .unwrap();
        let stored = image::load_from_memory(&store.get_files()[reference.as_str()]).unwrap();
        assert_eq!((stored.width(), stored.height()), (450, 350));
    }

    #[tokio::test]
    async fn test_default_ceiling_is_five_mebibytes() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());
        let file = SourceFile::new("huge.png", "image/png", vec![0; 5 * 1024 * 1024 + 1]);

        let err = h.pipeline.validate(&file).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let file = SourceFile::new("big.png", "image/png", vec![0; 5 * 1024 * 1024]);
        assert!(h.pipeline.validate(&file).is_ok());
    }

    #[tokio::test]
    async fn test_media_type_check_is_case_insensitive() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());
        let file = SourceFile::new("a.PNG", "IMAGE/PNG", vec![1]);
        assert!(h.pipeline.validate(&file).is_ok());
    }

    #[tokio::test]
    async fn test_output_dimensions_for_all_aspect_ratios() {
        let preview_dir = TempDir::new().unwrap();
        let store = MockBlobStore::new();
        let pipeline = UploadPipeline::new(
            Arc::new(ImageProcessor::new()),
            Arc::new(store.clone()),
            PipelineConfig {
                preview_dir: preview_dir.path().to_path_buf(),
                ..PipelineConfig::default()
            },
        );

        for (w, h) in [(300, 300), (200, 900), (1000, 100), (1, 1)] {
            let reference = pipeline
                .normalize_and_upload(png_file("tile.png", w, h), "clients")
                .await
                .unwrap();
            let stored = image::load_from_memory(&store.get_files()[reference.as_str()]).unwrap();
            assert_eq!(
                (stored.width(), stored.height()),
                (450, 350),
                "source {}x{}",
                w,
                h
            );
        }
        assert_eq!(store.get_put_count(), 4);
    }

    #[tokio::test]
    async fn test_second_upload_while_in_flight_is_rejected() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new().holding_puts());

        let first = tokio::spawn({
            let pipeline = h.pipeline.clone();
            async move {
                pipeline
                    .normalize_and_upload(png_file("first.png", 10, 10), "projects")
                    .await
            }
        });
        h.store.put_started().await;
        assert_eq!(h.pipeline.state(), UploadState::InFlight);

        let second = h
            .pipeline
            .normalize_and_upload(png_file("second.png", 10, 10), "projects")
            .await;
        assert!(matches!(second, Err(Error::Concurrency)));

        h.store.release_puts(1);
        let reference = first.await.unwrap().unwrap();
        assert!(reference.as_str().ends_with("_first.jpg"));
        assert_eq!(h.store.get_put_count(), 1);
        assert_eq!(h.image.get_load_count(), 1);
        assert_eq!(h.pipeline.state(), UploadState::Idle);
    }

    #[tokio::test]
    async fn test_hung_store_times_out_and_releases_guard() {
        let h = Harness::with_config(MockImageProcessor::new(), MockBlobStore::new(), |c| {
            c.upload_timeout = Duration::from_millis(50);
        });
        h.store.set_hanging(true);

        let err = h
            .pipeline
            .normalize_and_upload(png_file("slow.png", 10, 10), "projects")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                phase: UploadPhase::Upload,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(h.pipeline.state(), UploadState::Idle);
        assert_eq!(h.preview_files(), 0);

        h.store.set_hanging(false);
        let retry = h
            .pipeline
            .normalize_and_upload(png_file("slow.png", 10, 10), "projects")
            .await;
        assert!(retry.is_ok());
        assert_eq!(h.store.get_put_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_decode_times_out() {
        let h = Harness::with_config(
            MockImageProcessor::new().with_decode_delay(Duration::from_millis(500)),
            MockBlobStore::new(),
            |c| c.decode_timeout = Duration::from_millis(20),
        );

        let err = h
            .pipeline
            .normalize_and_upload(png_file("a.png", 10, 10), "projects")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Timeout {
                phase: UploadPhase::Decode,
                ..
            }
        ));
        assert_eq!(h.image.get_encode_count(), 0);
        assert_eq!(h.store.get_put_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_encode_times_out() {
        let h = Harness::with_config(
            MockImageProcessor::new().with_encode_delay(Duration::from_millis(500)),
            MockBlobStore::new(),
            |c| c.encode_timeout = Duration::from_millis(20),
        );

        let err = h
            .pipeline
            .normalize_and_upload(png_file("a.png", 10, 10), "projects")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Timeout {
                phase: UploadPhase::Encode,
                ..
            }
        ));
        assert_eq!(h.store.get_put_count(), 0);
    }

    #[tokio::test]
    async fn test_processing_failures_write_nothing() {
        for failure in [MockFailure::Decode, MockFailure::Encode] {
            let h = Harness::new(
                MockImageProcessor::new().with_failure(failure),
                MockBlobStore::new(),
            );

            let err = h
                .pipeline
                .normalize_and_upload(png_file("a.png", 10, 10), "projects")
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Processing);
            assert_eq!(h.store.get_put_count(), 0);
            assert_eq!(h.preview_files(), 0);
            assert_eq!(h.pipeline.state(), UploadState::Idle);
        }
    }

    #[tokio::test]
    async fn test_corrupt_image_is_decode_error() {
        let preview_dir = TempDir::new().unwrap();
        let store = MockBlobStore::new();
        let pipeline = UploadPipeline::new(
            Arc::new(ImageProcessor::new()),
            Arc::new(store.clone()),
            PipelineConfig {
                preview_dir: preview_dir.path().to_path_buf(),
                ..PipelineConfig::default()
            },
        );
        let file = SourceFile::new("fake.jpg", "image/jpeg", b"not really a jpeg".to_vec());

        let err = pipeline
            .normalize_and_upload(file, "projects")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(store.get_put_count(), 0);
    }

    #[tokio::test]
    async fn test_store_permission_rejection_is_classified() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());
        h.store.fail_puts_with(Error::Permission);

        let err = h
            .pipeline
            .normalize_and_upload(png_file("a.png", 10, 10), "projects")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(h.pipeline.state(), UploadState::Idle);
    }

    #[tokio::test]
    async fn test_identical_names_get_distinct_references() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());

        let first = h
            .pipeline
            .normalize_and_upload(png_file("logo.png", 10, 10), "clients")
            .await
            .unwrap();
        let second = h
            .pipeline
            .normalize_and_upload(png_file("logo.png", 10, 10), "clients")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(h.store.get_files().len(), 2);
    }

    #[tokio::test]
    async fn test_preview_is_staged_then_released() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());

        h.pipeline
            .normalize_and_upload(png_file("a.png", 10, 10), "projects")
            .await
            .unwrap();

        let seen = h.image.get_seen_sources();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(h.preview_dir.path()));
        assert!(!seen[0].exists());
    }

    #[tokio::test]
    async fn test_abandoned_upload_releases_guard_and_preview() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new().holding_puts());

        let task = tokio::spawn({
            let pipeline = h.pipeline.clone();
            async move {
                pipeline
                    .normalize_and_upload(png_file("gone.png", 10, 10), "projects")
                    .await
            }
        });
        h.store.put_started().await;
        assert_eq!(h.preview_files(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(h.pipeline.state(), UploadState::Idle);
        assert_eq!(h.preview_files(), 0);
        assert_eq!(h.store.get_put_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_target_geometry() {
        let h = Harness::with_config(MockImageProcessor::new(), MockBlobStore::new(), |c| {
            c.target = Dimensions::new(200, 100);
        });

        let result = h
            .pipeline
            .normalize_and_upload(png_file("a.png", 10, 10), "projects")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_per_call_format_overrides_config() {
        let preview_dir = TempDir::new().unwrap();
        let store = MockBlobStore::new();
        let pipeline = UploadPipeline::new(
            Arc::new(ImageProcessor::new()),
            Arc::new(store.clone()),
            PipelineConfig {
                preview_dir: preview_dir.path().to_path_buf(),
                ..PipelineConfig::default()
            },
        );

        let reference = pipeline
            .normalize_and_upload_as(
                png_file("banner.png", 300, 40),
                "projects",
                TileFormat::new(120, 80, 90),
            )
            .await
            .unwrap();

        let files = store.get_files();
        let stored = image::load_from_memory(&files[reference.as_str()]).unwrap();
        assert_eq!((stored.width(), stored.height()), (120, 80));
        assert_eq!(pipeline.config().tile_format(), TileFormat::new(450, 350, 75));
    }

    #[tokio::test]
    async fn test_invalid_per_call_format_is_rejected_before_decode() {
        let h = Harness::new(MockImageProcessor::new(), MockBlobStore::new());

        for format in [TileFormat::new(0, 80, 75), TileFormat::new(120, 80, 0)] {
            let err = h
                .pipeline
                .normalize_and_upload_as(png_file("a.png", 10, 10), "projects", format)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        assert_eq!(h.image.get_load_count(), 0);
        assert_eq!(h.store.get_put_count(), 0);
        assert_eq!(h.pipeline.state(), UploadState::Idle);
    }
}
