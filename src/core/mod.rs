pub mod middleware;

use serde::Deserialize;

/// Error envelope shared by the Google REST APIs (Firestore, Identity Toolkit).
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}

impl ApiErrorResponse {
    pub fn display_message(&self) -> String {
        format!("{} (code: {})", self.error.message, self.error.code)
    }
}

/// A failed REST call, reduced to what callers branch on.
#[derive(Debug, Clone)]
pub struct ApiFailure {
    pub http_status: u16,
    /// Canonical status such as `NOT_FOUND` or `ALREADY_EXISTS`, when the body carried one.
    pub status: Option<String>,
    pub message: String,
}

pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> ApiFailure {
    let http_status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorResponse>(&body) {
        Ok(error_resp) => ApiFailure {
            http_status: http_status.as_u16(),
            status: error_resp.error.status.clone(),
            message: format!("{}: {}", default_msg, error_resp.display_message()),
        },
        Err(_) => ApiFailure {
            http_status: http_status.as_u16(),
            status: None,
            message: format!("{}: {} {}", default_msg, http_status, body),
        },
    }
}
