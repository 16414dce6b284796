//! Account flows: sign-in with Firebase Auth, then make sure the user has a
//! profile document.

use crate::auth::{AuthError, AuthUser, SessionHandle};
use crate::error::Result;
use crate::models::UserProfile;
use crate::users::UserDirectory;
use tracing::info;

#[derive(Clone)]
pub struct Accounts {
    session: SessionHandle,
    users: UserDirectory,
}

impl Accounts {
    pub fn new(session: SessionHandle, users: UserDirectory) -> Self {
        Self { session, users }
    }

    /// Creates an email/password account and its profile.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserProfile> {
        let session = self.session.identity().sign_up(email.trim(), password).await?;
        let user = session.user.clone();
        self.session.set(session).await;
        self.users.register_profile(&user).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile> {
        let session = self
            .session
            .identity()
            .sign_in_with_password(email.trim(), password)
            .await?;
        let user = session.user.clone();
        self.session.set(session).await;
        self.users.ensure_profile(&user).await
    }

    /// Federated sign-in, e.g. `("google.com", google_id_token)`.
    pub async fn sign_in_with_idp(&self, provider_id: &str, id_token: &str) -> Result<UserProfile> {
        let session = self
            .session
            .identity()
            .sign_in_with_idp(provider_id, id_token)
            .await?;
        let user = session.user.clone();
        self.session.set(session).await;
        self.users.ensure_profile(&user).await
    }

    pub async fn sign_out(&self) {
        self.session.sign_out().await;
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.session.user().await
    }

    pub async fn change_password(&self, new_password: &str) -> Result<()> {
        let current = self.session.current().await.ok_or(AuthError::NotSignedIn)?;
        let updated = self
            .session
            .identity()
            .change_password(&current, new_password)
            .await?;
        self.session.set(updated).await;
        info!(uid = %current.user.uid, "changed password");
        Ok(())
    }

    /// Updates the profile document and mirrors the display name to the
    /// auth account.
    pub async fn update_profile(
        &self,
        username: &str,
        display_name: &str,
        phone_number: &str,
    ) -> Result<()> {
        let current = self.session.current().await.ok_or(AuthError::NotSignedIn)?;
        self.users
            .update_profile(&current.user.uid, username, display_name, phone_number)
            .await?;

        let user = self
            .session
            .identity()
            .update_profile(&current, Some(display_name.trim()), None)
            .await?;
        self.set_user(user).await;
        Ok(())
    }

    /// Sets or removes the profile photo on both the auth account and the
    /// profile document.
    pub async fn set_photo(&self, photo_url: Option<&str>) -> Result<()> {
        let current = self.session.current().await.ok_or(AuthError::NotSignedIn)?;
        let user = self
            .session
            .identity()
            .update_profile(&current, None, Some(photo_url))
            .await?;
        self.users.set_photo(&current.user.uid, photo_url).await?;
        self.set_user(user).await;
        Ok(())
    }

    async fn set_user(&self, user: AuthUser) {
        if let Some(mut session) = self.session.current().await {
            session.user = user;
            self.session.set(session).await;
        }
    }
}
