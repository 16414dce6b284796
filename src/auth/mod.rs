//! Firebase Authentication over the Identity Toolkit REST API.
//!
//! Sign-in itself is delegated to Firebase; this module only exchanges
//! credentials for tokens and keeps the current session fresh.

pub mod models;
pub mod session;


pub use models::{AuthSession, AuthUser};
pub use session::SessionHandle;

use crate::core::parse_error_response;
use models::{
    IdpRequest, PasswordRequest, RefreshResponse, SignInResponse, UpdateAccountRequest,
    UpdateAccountResponse,
};
use reqwest::{header, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

const IDENTITY_TOOLKIT_API: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_API: &str = "https://securetoken.googleapis.com/v1";

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Password must be at least {MIN_PASSWORD_LEN} characters")]
    WeakPassword,
    #[error("Not signed in")]
    NotSignedIn,
}

/// Client for the Identity Toolkit and Secure Token endpoints.
#[derive(Clone)]
pub struct IdentityClient {
    client: ClientWithMiddleware,
    api_key: String,
    identity_url: String,
    token_url: String,
}

impl IdentityClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::new_with_urls(api_key, IDENTITY_TOOLKIT_API, SECURE_TOKEN_API)
    }

    pub fn new_with_urls(api_key: impl Into<String>, identity_url: &str, token_url: &str) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            api_key: api_key.into(),
            identity_url: identity_url.trim_end_matches('/').to_string(),
            token_url: token_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call<B, R>(&self, method: &str, body: &B, failure: &str) -> Result<R, AuthError>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}/accounts:{}", self.identity_url, method);

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = parse_error_response(response, failure).await;
            return Err(AuthError::ApiError(failure.message));
        }

        Ok(response.json().await?)
    }

    /// Creates an email/password account and signs it in.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self.call("signUp", &request, "Sign up failed").await?;
        info!(uid = %response.local_id, "account created");
        Ok(response.into_session())
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, AuthError> {
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: SignInResponse = self
            .call("signInWithPassword", &request, "Sign in failed")
            .await?;
        info!(uid = %response.local_id, "signed in with password");
        Ok(response.into_session())
    }

    /// Federated sign-in with an ID token from `provider_id` (e.g. `google.com`).
    pub async fn sign_in_with_idp(
        &self,
        provider_id: &str,
        provider_id_token: &str,
    ) -> Result<AuthSession, AuthError> {
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", provider_id_token)
            .append_pair("providerId", provider_id)
            .finish();
        let request = IdpRequest {
            post_body,
            request_uri: "http://localhost".to_string(),
            return_secure_token: true,
            return_idp_credential: true,
        };
        let response: SignInResponse = self
            .call("signInWithIdp", &request, "Federated sign in failed")
            .await?;
        info!(uid = %response.local_id, provider = provider_id, "signed in with identity provider");
        Ok(response.into_session())
    }

    /// Exchanges a refresh token for a new ID token.
    pub async fn refresh(&self, session: &AuthSession) -> Result<AuthSession, AuthError> {
        let url = format!("{}/token", self.token_url);
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &session.refresh_token)
            .finish();

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let failure = parse_error_response(response, "Token refresh failed").await;
            return Err(AuthError::ApiError(failure.message));
        }

        let refreshed: RefreshResponse = response.json().await?;
        let mut user = session.user.clone();
        user.uid = refreshed.user_id;
        Ok(AuthSession {
            user,
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
            expires_at: models::expiry_from(refreshed.expires_in.as_deref()),
        })
    }

    /// Updates the profile attributes Firebase Auth keeps for the account.
    ///
    /// `photo_url: Some(None)` removes the photo.
    pub async fn update_profile(
        &self,
        session: &AuthSession,
        display_name: Option<&str>,
        photo_url: Option<Option<&str>>,
    ) -> Result<AuthUser, AuthError> {
        let mut request = UpdateAccountRequest {
            id_token: session.id_token.clone(),
            display_name: display_name.map(str::to_string),
            ..Default::default()
        };
        match photo_url {
            Some(Some(url)) => request.photo_url = Some(url.to_string()),
            Some(None) => request.delete_attribute.push("PHOTO_URL".to_string()),
            None => {}
        }

        let _: UpdateAccountResponse = self
            .call("update", &request, "Update profile failed")
            .await?;

        let mut user = session.user.clone();
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }
        if let Some(photo) = photo_url {
            user.photo_url = photo.map(str::to_string);
        }
        Ok(user)
    }

    /// Changes the password; Firebase answers with fresh tokens.
    pub async fn change_password(
        &self,
        session: &AuthSession,
        new_password: &str,
    ) -> Result<AuthSession, AuthError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        let request = UpdateAccountRequest {
            id_token: session.id_token.clone(),
            password: Some(new_password.to_string()),
            return_secure_token: true,
            ..Default::default()
        };
        let response: UpdateAccountResponse = self
            .call("update", &request, "Change password failed")
            .await?;

        let mut updated = session.clone();
        if let (Some(id_token), Some(refresh_token)) = (response.id_token, response.refresh_token) {
            updated.id_token = id_token;
            updated.refresh_token = refresh_token;
            updated.expires_at = models::expiry_from(response.expires_in.as_deref());
        }
        Ok(updated)
    }
}
