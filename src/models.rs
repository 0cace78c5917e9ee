//! Data models and structures
//!
//! Defines the upload pipeline's value types, the catalog records stored in
//! the document store, and environment-driven configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_TARGET_WIDTH: u32 = 450;
pub const DEFAULT_TARGET_HEIGHT: u32 = 350;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// A user-selected file as handed to the pipeline.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_WIDTH, DEFAULT_TARGET_HEIGHT)
    }
}

/// Encoded, fixed-geometry output of the normalization steps.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub dimensions: Dimensions,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Path of a blob that the store has durably accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageReference(String);

impl StorageReference {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Catalog records

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image_id: StorageReference,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub image_id: StorageReference,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: String,
    pub description: String,
    pub image_id: Option<StorageReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    pub designation: String,
    pub review: String,
    pub image_id: StorageReference,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    pub designation: String,
    pub review: String,
    pub image_id: StorageReference,
}

#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: String,
    pub designation: String,
    pub review: String,
    pub image_id: Option<StorageReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub mobile: String,
    pub city: String,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    pub full_name: String,
    pub email: String,
    pub mobile: String,
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    pub subscribed_at: i64,
}

/// A record together with the display URL of its image, if one resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithImageUrl<T> {
    #[serde(flatten)]
    pub record: T,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub projects: usize,
    pub clients: usize,
    pub contacts: usize,
    pub subscribers: usize,
}

// Configuration

/// Limits and geometry the upload pipeline runs with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_bytes: usize,
    pub target: Dimensions,
    pub quality: u8,
    pub decode_timeout: Duration,
    pub encode_timeout: Duration,
    pub upload_timeout: Duration,
    pub preview_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            target: Dimensions::default(),
            quality: DEFAULT_JPEG_QUALITY,
            decode_timeout: Duration::from_secs(10),
            encode_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(30),
            preview_dir: std::env::temp_dir(),
        }
    }
}

/// Output geometry and JPEG quality for one normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileFormat {
    pub target: Dimensions,
    pub quality: u8,
}

impl TileFormat {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            target: Dimensions::new(width, height),
            quality,
        }
    }
}

impl PipelineConfig {
    /// The configured output format, used when a call does not pass its own.
    pub fn tile_format(&self) -> TileFormat {
        TileFormat {
            target: self.target,
            quality: self.quality,
        }
    }
}

/// How retrieval URLs are produced for stored blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlMode {
    Public { base_url: String },
    Presigned { expires_in: Duration },
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub force_path_style: bool,
    pub url_mode: UrlMode,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub admin_token: String,
    pub pipeline: PipelineConfig,
}

impl StorageConfig {
    /// Storage settings alone, for read-only commands that never need the
    /// admin token.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url_mode = match lookup("STORAGE_PUBLIC_BASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(base_url) => UrlMode::Public {
                base_url: base_url.trim_end_matches('/').to_string(),
            },
            None => UrlMode::Presigned {
                expires_in: Duration::from_secs(parse_or(&lookup, "STORAGE_URL_TTL_SECS", 3600)?),
            },
        };

        Ok(Self {
            access_key_id: required(&lookup, "STORAGE_ACCESS_KEY_ID")?,
            secret_access_key: required(&lookup, "STORAGE_SECRET_ACCESS_KEY")?,
            endpoint: lookup("STORAGE_ENDPOINT")
                .unwrap_or_else(|| "https://nyc3.digitaloceanspaces.com".to_string()),
            region: lookup("STORAGE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            bucket: lookup("STORAGE_BUCKET").unwrap_or_else(|| "showcase-media".to_string()),
            force_path_style: parse_or(&lookup, "STORAGE_FORCE_PATH_STYLE", false)?,
            url_mode,
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = StorageConfig::from_lookup(&lookup)?;

        let defaults = PipelineConfig::default();
        let quality: u8 = parse_or(&lookup, "UPLOAD_JPEG_QUALITY", defaults.quality)?;
        if !(1..=100).contains(&quality) {
            return Err(Error::Config(format!(
                "UPLOAD_JPEG_QUALITY must be between 1 and 100, got {}",
                quality
            )));
        }

        let target = Dimensions::new(
            parse_or(&lookup, "UPLOAD_TARGET_WIDTH", defaults.target.width)?,
            parse_or(&lookup, "UPLOAD_TARGET_HEIGHT", defaults.target.height)?,
        );
        if target.width == 0 || target.height == 0 {
            return Err(Error::Config("Upload target dimensions must be non-zero".to_string()));
        }

        let pipeline = PipelineConfig {
            max_bytes: parse_or(&lookup, "UPLOAD_MAX_BYTES", defaults.max_bytes)?,
            target,
            quality,
            decode_timeout: Duration::from_millis(parse_or(
                &lookup,
                "UPLOAD_DECODE_TIMEOUT_MS",
                10_000,
            )?),
            encode_timeout: Duration::from_millis(parse_or(
                &lookup,
                "UPLOAD_ENCODE_TIMEOUT_MS",
                5_000,
            )?),
            upload_timeout: Duration::from_millis(parse_or(&lookup, "UPLOAD_TIMEOUT_MS", 30_000)?),
            preview_dir: lookup("UPLOAD_PREVIEW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.preview_dir),
        };

        Ok(Self {
            storage,
            admin_token: required(&lookup, "ADMIN_TOKEN")?,
            pipeline,
        })
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{} not set", name)))
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", name, raw, e))),
        _ => Ok(default),
    }
}
