use http::Extensions;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::sync::Arc;
use tokio::sync::OnceCell;
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

type ServiceAuthenticator = Authenticator<HttpsConnector<HttpConnector>>;

const FIRESTORE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/datastore",
];

/// Supplies the bearer token attached to outgoing requests.
///
/// `Ok(None)` means the request goes out unauthenticated (emulators, tests).
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<Option<String>, anyhow::Error>;
}

/// OAuth2 access tokens minted for a service account.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    authenticator: OnceCell<ServiceAuthenticator>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            authenticator: OnceCell::new(),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn token(&self) -> Result<Option<String>, anyhow::Error> {
        let auth = self
            .authenticator
            .get_or_try_init(|| async {
                ServiceAccountAuthenticator::builder(self.key.clone())
                    .build()
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            })
            .await?;

        let token = auth.token(FIRESTORE_SCOPES).await?;
        let token = token
            .token()
            .ok_or_else(|| anyhow::anyhow!("No token found"))?;
        Ok(Some(token.to_string()))
    }
}

/// A fixed bearer token, e.g. an ID token obtained elsewhere.
pub struct StaticToken(pub String);

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(Some(self.0.clone()))
    }
}

struct Anonymous;

#[async_trait::async_trait]
impl TokenProvider for Anonymous {
    async fn token(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(None)
    }
}

/// Attaches `Authorization: Bearer …` from a [`TokenProvider`].
#[derive(Clone)]
pub struct AuthMiddleware {
    provider: Arc<dyn TokenProvider>,
}

impl AuthMiddleware {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }

    pub fn service_account(key: ServiceAccountKey) -> Self {
        Self::new(Arc::new(ServiceAccountTokens::new(key)))
    }

    /// No credentials at all; used against the Firestore emulator.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(Anonymous))
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self.provider.token().await.map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                "Failed to get auth token: {}",
                e
            ))
        })?;

        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| reqwest_middleware::Error::Middleware(e.into()))?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    #[tokio::test]
    async fn test_static_token_sets_bearer_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/ping")
                .header("authorization", "Bearer abc");
            then.status(200);
        });

        let client = ClientBuilder::new(Client::new())
            .with(AuthMiddleware::new(Arc::new(StaticToken("abc".into()))))
            .build();
        let response = client.get(server.url("/ping")).send().await.unwrap();

        assert!(response.status().is_success());
        mock.assert();
    }

    #[tokio::test]
    async fn test_anonymous_sends_no_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/ping").header_missing("authorization");
            then.status(200);
        });

        let client = ClientBuilder::new(Client::new())
            .with(AuthMiddleware::anonymous())
            .build();
        client.get(server.url("/ping")).send().await.unwrap();

        mock.assert();
    }
}
