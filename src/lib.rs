pub mod accounts;
pub mod auth;
pub mod config;
pub mod core;
pub mod error;
pub mod feed;
#[cfg(feature = "firestore")]
pub mod firestore;
pub mod media;
pub mod models;
pub mod private_chat;
pub mod rooms;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod users;

pub use error::{ChatError, Result};

use accounts::Accounts;
use auth::SessionHandle;
use config::ConfigError;
use private_chat::PrivateChats;
use rooms::RoomDirectory;
use std::sync::Arc;
use store::DocumentStore;
use users::UserDirectory;

/// Entry point tying the services to one document store.
#[derive(Clone)]
pub struct ChatApp {
    store: Arc<dyn DocumentStore>,
    session: Option<SessionHandle>,
}

impl ChatApp {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            session: None,
        }
    }

    pub fn with_session(store: Arc<dyn DocumentStore>, session: SessionHandle) -> Self {
        Self {
            store,
            session: Some(session),
        }
    }

    /// Connects to Firestore as configured.
    ///
    /// `FIRESTORE_EMULATOR_HOST` wins. Otherwise requests are authorized with
    /// the signed-in user's ID token when a web API key is set, or with the
    /// service account from `GOOGLE_APPLICATION_CREDENTIALS`.
    #[cfg(feature = "firestore")]
    pub async fn connect(config: &config::Config) -> Result<Self> {
        use crate::core::middleware::AuthMiddleware;
        use firestore::FirestoreStore;

        let project_id = config.require_project_id()?;
        let session = config
            .api_key
            .as_deref()
            .map(|key| SessionHandle::new(auth::IdentityClient::new(key)));

        let store = if let Some(host) = &config.emulator_host {
            tracing::info!(%host, "using firestore emulator");
            FirestoreStore::emulator(host, project_id)
        } else if let Some(session) = &session {
            FirestoreStore::new(project_id, AuthMiddleware::new(Arc::new(session.clone())))
        } else if let Some(path) = &config.credentials_path {
            let key = yup_oauth2::read_service_account_key(path).await?;
            FirestoreStore::new(project_id, AuthMiddleware::service_account(key))
        } else {
            return Err(ConfigError::Missing("FIREBASE_API_KEY").into());
        };

        Ok(Self {
            store: Arc::new(store),
            session,
        })
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub fn users(&self) -> UserDirectory {
        UserDirectory::new(self.store.clone())
    }

    pub fn rooms(&self) -> RoomDirectory {
        RoomDirectory::new(self.store.clone())
    }

    pub fn private_chats(&self) -> PrivateChats {
        PrivateChats::new(self.store.clone())
    }

    /// Account flows; needs a Firebase web API key.
    pub fn accounts(&self) -> Result<Accounts> {
        let session = self
            .session
            .clone()
            .ok_or(ConfigError::Missing("FIREBASE_API_KEY"))?;
        Ok(Accounts::new(session, self.users()))
    }
}
