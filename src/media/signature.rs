use super::MediaError;
use crate::core::parse_error_response;
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Body of a signing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// Signature and the Unix timestamp it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedUpload {
    pub signature: String,
    pub timestamp: i64,
}

/// Signs upload parameters the way the media host verifies them: sorted
/// `key=value` pairs joined by `&`, the API secret appended, SHA-256 hex.
/// Empty values are left out.
pub fn sign_params(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
    let to_sign = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Produces upload signatures, locally or through the signing route.
#[async_trait::async_trait]
pub trait SignatureSource: Send + Sync {
    async fn sign(&self, folder: Option<&str>) -> Result<SignedUpload, MediaError>;
}

/// Signs with the API secret held in this process.
#[derive(Clone)]
pub struct UploadSigner {
    api_secret: String,
    upload_preset: String,
}

impl UploadSigner {
    pub fn new(api_secret: impl Into<String>, upload_preset: impl Into<String>) -> Self {
        Self {
            api_secret: api_secret.into(),
            upload_preset: upload_preset.into(),
        }
    }

    pub fn sign_at(&self, folder: Option<&str>, timestamp: i64) -> SignedUpload {
        let mut params = BTreeMap::new();
        params.insert("timestamp", timestamp.to_string());
        params.insert("upload_preset", self.upload_preset.clone());
        if let Some(folder) = folder {
            params.insert("folder", folder.to_string());
        }

        SignedUpload {
            signature: sign_params(&params, &self.api_secret),
            timestamp,
        }
    }

    pub fn sign_now(&self, folder: Option<&str>) -> SignedUpload {
        self.sign_at(folder, chrono::Utc::now().timestamp())
    }
}

#[async_trait::async_trait]
impl SignatureSource for UploadSigner {
    async fn sign(&self, folder: Option<&str>) -> Result<SignedUpload, MediaError> {
        Ok(self.sign_now(folder))
    }
}

/// Asks the signing route (`POST /api/sign-cloudinary`) for a signature.
#[derive(Clone)]
pub struct RemoteSigner {
    client: ClientWithMiddleware,
    url: String,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl SignatureSource for RemoteSigner {
    async fn sign(&self, folder: Option<&str>) -> Result<SignedUpload, MediaError> {
        let request = SignRequest {
            folder: folder.map(str::to_string),
        };
        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = parse_error_response(response, "Failed to fetch upload signature").await;
            return Err(MediaError::Signature(failure.message));
        }

        Ok(response.json().await?)
    }
}
