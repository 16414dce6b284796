//! User profiles, usernames and user search.

pub mod username;


pub use username::{format_username, generate_unique_username, is_valid_username};

use crate::auth::AuthUser;
use crate::error::{ChatError, Result};
use crate::models::UserProfile;
use crate::store::{Document, DocumentStore, Query, Write};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reads and writes documents of the `users` collection.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
}

fn user_path(uid: &str) -> String {
    format!("users/{}", uid)
}

fn optional(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

pub(crate) fn profile_from(doc: &Document) -> Result<UserProfile> {
    let mut profile: UserProfile = doc.data()?;
    if profile.uid.is_empty() {
        profile.uid = doc.id.clone();
    }
    Ok(profile)
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        match self.store.get(&user_path(uid)).await? {
            Some(doc) => Ok(Some(profile_from(&doc)?)),
            None => Ok(None),
        }
    }

    /// Makes sure the signed-in user has a profile document with a username.
    ///
    /// Creates the document on first sign-in. Older documents without a
    /// username get one assigned.
    pub async fn ensure_profile(&self, user: &AuthUser) -> Result<UserProfile> {
        let path = user_path(&user.uid);

        match self.store.get(&path).await? {
            None => {
                let username = generate_unique_username(
                    self.store.as_ref(),
                    user.display_name.as_deref(),
                    user.email.as_deref(),
                )
                .await?;
                let write = Write::new()
                    .field("uid", user.uid.as_str())
                    .field("email", optional(user.email.as_deref()))
                    .field("username", username.as_str())
                    .field("displayName", optional(user.display_name.as_deref()))
                    .field("photoURL", optional(user.photo_url.as_deref()))
                    .server_timestamp("createdAt");
                self.store.set(&path, write).await?;
                info!(uid = %user.uid, %username, "created user profile");
            }
            Some(doc) => {
                let has_username = doc
                    .field("username")
                    .and_then(Value::as_str)
                    .is_some_and(|u| !u.is_empty());
                if !has_username {
                    let username = generate_unique_username(
                        self.store.as_ref(),
                        user.display_name.as_deref(),
                        user.email.as_deref(),
                    )
                    .await?;
                    self.store
                        .merge(&path, Write::new().field("username", username.as_str()))
                        .await?;
                    info!(uid = %user.uid, %username, "assigned missing username");
                }
            }
        }

        self.profile(&user.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("User {}", user.uid)))
    }

    /// Creates the profile of a freshly registered account.
    ///
    /// The display name starts out as the generated username.
    pub async fn register_profile(&self, user: &AuthUser) -> Result<UserProfile> {
        let username = generate_unique_username(
            self.store.as_ref(),
            user.display_name.as_deref(),
            user.email.as_deref(),
        )
        .await?;

        let write = Write::new()
            .field("uid", user.uid.as_str())
            .field("email", optional(user.email.as_deref()))
            .field("username", username.as_str())
            .field("displayName", username.as_str())
            .server_timestamp("createdAt");
        self.store.set(&user_path(&user.uid), write).await?;
        info!(uid = %user.uid, %username, "registered user profile");

        self.profile(&user.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("User {}", user.uid)))
    }

    /// Edits the profile fields a user controls.
    pub async fn update_profile(
        &self,
        uid: &str,
        username: &str,
        display_name: &str,
        phone_number: &str,
    ) -> Result<()> {
        let username = username.trim();
        let display_name = display_name.trim();

        if display_name.is_empty() {
            return Err(ChatError::InvalidInput("Display name cannot be empty".into()));
        }
        if username.is_empty() {
            return Err(ChatError::InvalidInput("Username cannot be empty".into()));
        }
        if !is_valid_username(username) {
            return Err(ChatError::InvalidInput(
                "Username may only contain lowercase letters, digits and underscores (max 20)"
                    .into(),
            ));
        }

        let owners = self
            .store
            .query(&Query::collection("users").where_eq("username", username))
            .await?;
        if owners.iter().any(|doc| doc.id != uid) {
            return Err(ChatError::UsernameTaken(username.to_string()));
        }

        let write = Write::new()
            .field("username", username)
            .field("displayName", display_name)
            .field("phoneNumber", phone_number.trim())
            .server_timestamp("updatedAt");
        self.store.update(&user_path(uid), write).await?;
        info!(uid, username, "updated user profile");
        Ok(())
    }

    /// Sets or clears the profile photo URL.
    pub async fn set_photo(&self, uid: &str, photo_url: Option<&str>) -> Result<()> {
        let write = Write::new()
            .field("photoURL", optional(photo_url))
            .server_timestamp("updatedAt");
        self.store.update(&user_path(uid), write).await?;
        info!(uid, removed = photo_url.is_none(), "updated profile photo");
        Ok(())
    }

    /// Case-insensitive substring search over username, email and display name.
    ///
    /// Scans the whole collection. The caller is never part of the result.
    pub async fn search_users(&self, current_uid: &str, term: &str) -> Result<Vec<UserProfile>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.store.query(&Query::collection("users")).await?;
        debug!(scanned = docs.len(), %term, "searching users");

        let matches = |value: &Option<String>| {
            value
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(&term))
        };

        let mut found = Vec::new();
        for doc in &docs {
            let profile = match profile_from(doc) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(path = %doc.path, error = %e, "skipping malformed user");
                    continue;
                }
            };
            if profile.uid == current_uid {
                continue;
            }
            if matches(&profile.username) || matches(&profile.email) || matches(&profile.display_name)
            {
                found.push(profile);
            }
        }
        Ok(found)
    }

    /// Stores a push registration token under `users/{uid}/deviceTokens/{token}`.
    pub async fn register_device_token(&self, uid: &str, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() || token.contains('/') {
            return Err(ChatError::InvalidInput("Invalid device token".into()));
        }
        let write = Write::new()
            .field("token", token)
            .server_timestamp("createdAt");
        self.store
            .set(&format!("users/{}/deviceTokens/{}", uid, token), write)
            .await?;
        info!(uid, "registered device token");
        Ok(())
    }
}

/// Passes on a term only once `quiet` has elapsed without a newer one.
///
/// The last pending term is flushed when the input ends.
pub fn debounce<S>(terms: S, quiet: Duration) -> BoxStream<'static, String>
where
    S: Stream<Item = String> + Send + 'static,
{
    stream::unfold(
        (terms.boxed(), false),
        move |(mut terms, finished)| async move {
            if finished {
                return None;
            }
            let mut pending = terms.next().await?;
            loop {
                match tokio::time::timeout(quiet, terms.next()).await {
                    Ok(Some(newer)) => pending = newer,
                    Ok(None) => return Some((pending, (terms, true))),
                    Err(_) => return Some((pending, (terms, false))),
                }
            }
        },
    )
    .boxed()
}
