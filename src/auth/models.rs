use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in identity as seen by the rest of the crate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Tokens and identity returned by a successful sign-in.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: AuthUser,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    /// Whether the ID token expires within `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

pub(crate) fn expiry_from(expires_in: Option<&str>) -> DateTime<Utc> {
    let seconds = expires_in
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(3600);
    Utc::now() + Duration::seconds(seconds)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpRequest {
    pub post_body: String,
    pub request_uri: String,
    pub return_secure_token: bool,
    pub return_idp_credential: bool,
}

/// Response of `signUp`, `signInWithPassword` and `signInWithIdp`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub local_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Option<String>,
}

impl SignInResponse {
    pub fn into_session(self) -> AuthSession {
        AuthSession {
            expires_at: expiry_from(self.expires_in.as_deref()),
            user: AuthUser {
                uid: self.local_id,
                email: self.email.filter(|e| !e.is_empty()),
                display_name: self.display_name.filter(|n| !n.is_empty()),
                photo_url: self.photo_url.filter(|p| !p.is_empty()),
            },
            id_token: self.id_token,
            refresh_token: self.refresh_token,
        }
    }
}

/// Response of the secure token endpoint (snake_case on the wire).
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub id_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delete_attribute: Vec<String>,
    pub return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountResponse {
    pub local_id: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<String>,
}
