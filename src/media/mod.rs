//! Image uploads to Cloudinary.
//!
//! Uploads are validated, de-duplicated by content hash, compressed and sent
//! as signed multipart requests. The API secret never has to live on the
//! uploading side: signatures can come from the signing route instead.

pub mod cache;
pub mod compress;
pub mod signature;

#[cfg(test)]
mod tests;

pub use cache::{content_hash, UploadCache};
pub use signature::{RemoteSigner, SignRequest, SignatureSource, SignedUpload, UploadSigner};

use crate::config::{CloudinaryConfig, Config, ConfigError, DEFAULT_MAX_UPLOAD_BYTES};
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const CLOUDINARY_API: &str = "https://api.cloudinary.com/v1_1";

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Only image files are allowed.")]
    NotAnImage(String),
    #[error("Image is too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("Could not read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Upload cache error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("Failed to fetch upload signature: {0}")]
    Signature(String),
    #[error("{0}")]
    Upload(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadErrorResponse {
    error: Option<UploadErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct UploadErrorDetails {
    message: String,
}

/// Checks the declared content type and size before anything is uploaded.
pub fn validate(bytes: &[u8], content_type: &str, max_bytes: usize) -> Result<(), MediaError> {
    if !content_type.starts_with("image/") {
        return Err(MediaError::NotAnImage(content_type.to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(MediaError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    Ok(())
}

fn multipart_body(fields: &[(&str, &str)], file: &compress::Compressed, boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"upload\"\r\n");
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
    body.extend_from_slice(&file.bytes);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--\r\n");

    body
}

/// Uploads images and remembers what was already uploaded.
pub struct ImageUploader {
    client: ClientWithMiddleware,
    upload_base: String,
    cloud_name: String,
    api_key: String,
    upload_preset: String,
    signer: Arc<dyn SignatureSource>,
    cache: UploadCache,
    max_bytes: usize,
}

impl ImageUploader {
    pub fn new(
        cloudinary: &CloudinaryConfig,
        signer: Arc<dyn SignatureSource>,
        cache: UploadCache,
    ) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            upload_base: CLOUDINARY_API.to_string(),
            cloud_name: cloudinary.cloud_name.clone(),
            api_key: cloudinary.api_key.clone(),
            upload_preset: cloudinary.upload_preset.clone(),
            signer,
            cache,
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Signs locally when the API secret is configured, otherwise through the
    /// signing route.
    pub async fn from_config(config: &Config) -> Result<Self, MediaError> {
        let cloudinary = config.require_cloudinary()?;
        let signer: Arc<dyn SignatureSource> = match (&cloudinary.api_secret, &cloudinary.signer_url) {
            (Some(secret), _) => Arc::new(UploadSigner::new(
                secret.clone(),
                cloudinary.upload_preset.clone(),
            )),
            (None, Some(url)) => Arc::new(RemoteSigner::new(url.clone())),
            (None, None) => return Err(ConfigError::Missing("CLOUDINARY_API_SECRET").into()),
        };
        let cache = UploadCache::open(&config.upload_cache_path).await?;
        Ok(Self::new(cloudinary, signer, cache).with_max_bytes(config.max_upload_bytes))
    }

    /// Points uploads at another API base (tests, proxies).
    pub fn with_upload_base(mut self, base: impl Into<String>) -> Self {
        self.upload_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Uploads an image and returns its secure URL.
    ///
    /// Bytes that were uploaded before are answered from the cache without
    /// contacting the media host.
    pub async fn upload(
        &self,
        bytes: &[u8],
        content_type: &str,
        folder: Option<&str>,
    ) -> Result<String, MediaError> {
        validate(bytes, content_type, self.max_bytes)?;

        let hash = content_hash(bytes);
        if let Some(url) = self.cache.get(&hash) {
            debug!(%hash, "duplicate upload, using cached url");
            return Ok(url);
        }

        let compressed = compress::compress(bytes, content_type)?;
        let signed = self.signer.sign(folder).await?;
        let timestamp = signed.timestamp.to_string();

        let mut fields = vec![
            ("api_key", self.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature", signed.signature.as_str()),
            ("upload_preset", self.upload_preset.as_str()),
        ];
        if let Some(folder) = folder {
            fields.push(("folder", folder));
        }

        let boundary = format!("upload_{}", &hash[..16]);
        let body = multipart_body(&fields, &compressed, &boundary);
        let url = format!("{}/{}/image/upload", self.upload_base, self.cloud_name);

        let response = self
            .client
            .post(&url)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<UploadErrorResponse>()
                .await
                .ok()
                .and_then(|r| r.error)
                .map(|e| e.message)
                .unwrap_or_else(|| format!("Cloudinary upload failed ({})", status));
            return Err(MediaError::Upload(message));
        }

        let uploaded: UploadResponse = response.json().await?;
        self.cache.insert(&hash, &uploaded.secure_url).await?;
        info!(
            bytes = compressed.bytes.len(),
            url = %uploaded.secure_url,
            "uploaded image"
        );
        Ok(uploaded.secure_url)
    }
}
