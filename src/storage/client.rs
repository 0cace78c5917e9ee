use super::{BlobStore, StoredObject};
use crate::models::{StorageConfig, StorageReference, UrlMode};
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::Region, Client as S3Client};

pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    url_mode: UrlMode,
}

impl S3BlobStore {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "showcase-admin",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            url_mode: config.url_mode.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<StorageReference> {
        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(body)
            .content_type(content_type)
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| classify_sdk_error("upload", path, e))?;

        Ok(StorageReference::new(path))
    }

    async fn get_url(&self, reference: &StorageReference) -> Result<String> {
        match &self.url_mode {
            UrlMode::Public { base_url } => Ok(public_url(base_url, reference)),
            UrlMode::Presigned { expires_in } => {
                let presigning = PresigningConfig::expires_in(*expires_in)
                    .map_err(|e| Error::Config(format!("Invalid presign lifetime: {}", e)))?;
                let request = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(reference.as_str())
                    .presigned(presigning)
                    .await
                    .map_err(|e| classify_sdk_error("presign", reference.as_str(), e))?;
                Ok(request.uri().to_string())
            }
        }
    }

    async fn delete(&self, reference: &StorageReference) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(reference.as_str())
            .send()
            .await
            .map_err(|e| classify_sdk_error("delete", reference.as_str(), e))?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<StoredObject>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => return Err(classify_sdk_error("read", path, e)),
        };

        let version = response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| Error::Storage(format!("No ETag returned for {}", path)))?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", path, e)))?
            .into_bytes()
            .to_vec();

        Ok(Some(StoredObject { data, version }))
    }

    async fn write_if(
        &self,
        path: &str,
        data: &[u8],
        content_type: &str,
        expected_version: Option<&str>,
    ) -> Result<()> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(data.to_vec()))
            .content_type(content_type);
        let request = match expected_version {
            Some(version) => request.if_match(version),
            None => request.if_none_match("*"),
        };

        request
            .send()
            .await
            .map_err(|e| classify_sdk_error("write", path, e))?;
        Ok(())
    }
}

fn public_url(base_url: &str, reference: &StorageReference) -> String {
    format!("{}/{}", base_url, reference)
}

fn classify_sdk_error<E>(action: &str, key: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = match &err {
        SdkError::ServiceError(ctx) => Some(ctx.raw().status().as_u16()),
        SdkError::ResponseError(ctx) => Some(ctx.raw().status().as_u16()),
        _ => None,
    };
    let transport = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
    );
    let code = err.code().map(str::to_string);
    let detail = format!(
        "Failed to {} {}: {}",
        action,
        key,
        DisplayErrorContext(&err)
    );
    classify_failure(transport, status, code.as_deref(), detail)
}

/// Map a storage failure onto the error taxonomy.
fn classify_failure(transport: bool, status: Option<u16>, code: Option<&str>, detail: String) -> Error {
    if transport {
        return Error::Network(detail);
    }

    match (status, code) {
        (_, Some("PreconditionFailed" | "ConditionalRequestConflict")) | (Some(412), _) => {
            Error::PreconditionFailed(detail)
        }
        (_, Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"))
        | (Some(401 | 403), _) => Error::Permission(detail),
        (_, Some("NoSuchKey" | "NoSuchBucket")) | (Some(404), _) => Error::NotFound(detail),
        (_, Some("SlowDown" | "ServiceUnavailable" | "RequestTimeout")) => Error::Network(detail),
        (Some(status), _) if status >= 500 || status == 408 || status == 429 => {
            Error::Network(detail)
        }
        _ => Error::Storage(detail),
    }
}
