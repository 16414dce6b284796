use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::media::MediaError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the chat services. Display text is meant for users.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Username \"{0}\" is already taken")]
    UsernameTaken(String),
    #[error("Failed to read credentials: {0}")]
    Credentials(#[from] std::io::Error),
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
