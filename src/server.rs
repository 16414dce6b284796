//! The signing route: hands out upload signatures so the API secret stays on
//! the server.

use crate::media::{SignRequest, SignedUpload, UploadSigner};
use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const SIGN_ROUTE: &str = "/api/sign-cloudinary";

pub fn router(signer: UploadSigner) -> Router {
    Router::new()
        .route(SIGN_ROUTE, post(sign_upload))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(signer))
}

// A missing or unreadable body signs without a folder.
async fn sign_upload(
    State(signer): State<Arc<UploadSigner>>,
    request: Option<Json<SignRequest>>,
) -> Json<SignedUpload> {
    let folder = request
        .and_then(|Json(request)| request.folder)
        .filter(|f| !f.is_empty());
    let signed = signer.sign_now(folder.as_deref());
    info!(folder = folder.as_deref().unwrap_or(""), "signed upload");
    Json(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn call(body: &'static str) -> SignedUpload {
        let app = router(UploadSigner::new("secret", "chat"));
        let response = app
            .oneshot(
                Request::post(SIGN_ROUTE)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_signs_with_folder() {
        let signed = call(r#"{"folder":"avatars"}"#).await;
        let expected = UploadSigner::new("secret", "chat").sign_at(Some("avatars"), signed.timestamp);
        assert_eq!(signed, expected);
    }

    #[tokio::test]
    async fn test_signs_without_folder() {
        let signed = call("{}").await;
        let expected = UploadSigner::new("secret", "chat").sign_at(None, signed.timestamp);
        assert_eq!(signed, expected);
        assert!((chrono::Utc::now().timestamp() - signed.timestamp).abs() < 60);
    }

    #[tokio::test]
    async fn test_empty_body_is_accepted() {
        let signed = call("").await;
        let expected = UploadSigner::new("secret", "chat").sign_at(None, signed.timestamp);
        assert_eq!(signed, expected);
    }
}
