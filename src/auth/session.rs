use super::{AuthError, AuthSession, AuthUser, IdentityClient};
use crate::core::middleware::TokenProvider;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;

/// The current signed-in session, shared between the account flows and the
/// request middleware.
#[derive(Clone)]
pub struct SessionHandle {
    identity: IdentityClient,
    session: Arc<RwLock<Option<AuthSession>>>,
}

impl SessionHandle {
    pub fn new(identity: IdentityClient) -> Self {
        Self {
            identity,
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    pub async fn set(&self, session: AuthSession) {
        *self.session.write().await = Some(session);
    }

    pub async fn current(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn user(&self) -> Option<AuthUser> {
        self.session.read().await.as_ref().map(|s| s.user.clone())
    }

    pub async fn sign_out(&self) {
        if let Some(session) = self.session.write().await.take() {
            info!(uid = %session.user.uid, "signed out");
        }
    }

    /// Returns a valid ID token, refreshing it when close to expiry.
    pub async fn id_token(&self) -> Result<String, AuthError> {
        {
            let guard = self.session.read().await;
            let session = guard.as_ref().ok_or(AuthError::NotSignedIn)?;
            if !session.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
                return Ok(session.id_token.clone());
            }
        }

        let mut guard = self.session.write().await;
        let session = guard.as_ref().ok_or(AuthError::NotSignedIn)?;
        // Another caller may have refreshed while we waited for the lock.
        if !session.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(session.id_token.clone());
        }
        debug!(uid = %session.user.uid, "refreshing id token");
        let refreshed = self.identity.refresh(session).await?;
        let token = refreshed.id_token.clone();
        *guard = Some(refreshed);
        Ok(token)
    }
}

#[async_trait::async_trait]
impl TokenProvider for SessionHandle {
    async fn token(&self) -> Result<Option<String>, anyhow::Error> {
        match self.id_token().await {
            Ok(token) => Ok(Some(token)),
            Err(AuthError::NotSignedIn) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
