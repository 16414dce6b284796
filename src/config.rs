//! Configuration loaded from environment variables.
//!
//! `.env` files are honoured through `dotenvy`. Nothing is required up front;
//! each entry point checks for the settings it needs.

use std::path::PathBuf;
use thiserror::Error;

/// Default upload size limit (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Credentials and settings for Cloudinary uploads.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudinaryConfig {
    /// Env: `CLOUDINARY_CLOUD_NAME`
    pub cloud_name: String,
    /// Env: `CLOUDINARY_API_KEY`
    pub api_key: String,
    /// Env: `CLOUDINARY_API_SECRET`. Only the signing side needs it.
    pub api_secret: Option<String>,
    /// Env: `CLOUDINARY_UPLOAD_PRESET`
    pub upload_preset: String,
    /// Remote signing route used when no secret is configured.
    /// Env: `ROOMCHAT_SIGNER_URL`
    pub signer_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Env: `FIREBASE_PROJECT_ID`
    pub project_id: Option<String>,
    /// Web API key for Identity Toolkit.
    /// Env: `FIREBASE_API_KEY`
    pub api_key: Option<String>,
    /// Service account JSON.
    /// Env: `GOOGLE_APPLICATION_CREDENTIALS`
    pub credentials_path: Option<PathBuf>,
    /// Env: `FIRESTORE_EMULATOR_HOST` (e.g. `localhost:8080`)
    pub emulator_host: Option<String>,
    pub cloudinary: Option<CloudinaryConfig>,
    /// Hash to URL cache of uploaded images.
    /// Env: `ROOMCHAT_UPLOAD_CACHE`
    /// Default: `<cache dir>/roomchat/uploads.json`
    pub upload_cache_path: PathBuf,
    /// Env: `ROOMCHAT_MAX_UPLOAD_BYTES`
    /// Default: 5 MiB
    pub max_upload_bytes: usize,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cloudinary = match (
            get("CLOUDINARY_CLOUD_NAME"),
            get("CLOUDINARY_API_KEY"),
            get("CLOUDINARY_UPLOAD_PRESET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(upload_preset)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret: get("CLOUDINARY_API_SECRET"),
                upload_preset,
                signer_url: get("ROOMCHAT_SIGNER_URL"),
            }),
            _ => None,
        };

        let max_upload_bytes = match get("ROOMCHAT_MAX_UPLOAD_BYTES") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "ROOMCHAT_MAX_UPLOAD_BYTES",
                value,
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let upload_cache_path = get("ROOMCHAT_UPLOAD_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(default_upload_cache);

        Ok(Self {
            project_id: get("FIREBASE_PROJECT_ID"),
            api_key: get("FIREBASE_API_KEY"),
            credentials_path: get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            emulator_host: get("FIRESTORE_EMULATOR_HOST"),
            cloudinary,
            upload_cache_path,
            max_upload_bytes,
        })
    }

    pub fn require_project_id(&self) -> Result<&str, ConfigError> {
        self.project_id
            .as_deref()
            .ok_or(ConfigError::Missing("FIREBASE_PROJECT_ID"))
    }

    pub fn require_cloudinary(&self) -> Result<&CloudinaryConfig, ConfigError> {
        self.cloudinary
            .as_ref()
            .ok_or(ConfigError::Missing("CLOUDINARY_CLOUD_NAME"))
    }
}

fn default_upload_cache() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roomchat")
        .join("uploads.json")
}
