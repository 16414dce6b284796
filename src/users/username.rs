use crate::store::{DocumentStore, Query, StoreError};
use rand::Rng;
use tracing::{debug, warn};

pub const MAX_USERNAME_LEN: usize = 20;
/// Probes against the user collection before giving up on uniqueness.
pub const MAX_USERNAME_ATTEMPTS: usize = 10;

const FALLBACK_USERNAME: &str = "user";

/// Lowercases `base`, turns whitespace runs into `_` and drops anything
/// outside `[a-z0-9_]`. The result is 1 to 20 characters long.
pub fn format_username(base: &str) -> String {
    let mut formatted = String::with_capacity(base.len());
    let mut in_whitespace = false;
    for c in base.to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                formatted.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            formatted.push(c);
        }
    }
    formatted.truncate(MAX_USERNAME_LEN);
    if formatted.is_empty() {
        FALLBACK_USERNAME.to_string()
    } else {
        formatted
    }
}

/// Whether `username` is something [`format_username`] could have produced.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Display name, else the local part of the email, else a fixed fallback.
pub fn username_source(display_name: Option<&str>, email: Option<&str>) -> String {
    display_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or_else(|| {
            email
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
        })
        .unwrap_or(FALLBACK_USERNAME)
        .to_string()
}

/// `base_NN`, with `base` shortened so the whole stays within the limit.
pub(crate) fn with_suffix(base: &str, suffix: u8) -> String {
    let keep = MAX_USERNAME_LEN - 3;
    let base: String = base.chars().take(keep).collect();
    format!("{}_{:02}", base, suffix)
}

pub(crate) async fn is_taken(store: &dyn DocumentStore, username: &str) -> Result<bool, StoreError> {
    let query = Query::collection("users").where_eq("username", username).limit(1);
    Ok(!store.query(&query).await?.is_empty())
}

/// Picks a username derived from the user's name that nobody else holds.
///
/// Tries the formatted base name first, then `base_NN` with a random two-digit
/// suffix. After [`MAX_USERNAME_ATTEMPTS`] probes the last candidate is
/// returned unchecked.
pub async fn generate_unique_username(
    store: &dyn DocumentStore,
    display_name: Option<&str>,
    email: Option<&str>,
) -> Result<String, StoreError> {
    let base = format_username(&username_source(display_name, email));
    let mut candidate = base.clone();

    for attempt in 1..=MAX_USERNAME_ATTEMPTS {
        if !is_taken(store, &candidate).await? {
            debug!(username = %candidate, attempt, "username available");
            return Ok(candidate);
        }
        let suffix = rand::thread_rng().gen_range(10..=99);
        candidate = with_suffix(&base, suffix);
    }

    warn!(username = %candidate, "no free username found, using last candidate");
    Ok(candidate)
}
