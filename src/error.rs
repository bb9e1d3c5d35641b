use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chromiumoxide::error::CdpError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImgError {
    #[error("Invalid or missing HTML content.")]
    Validation,

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("content load timed out after {0:?}")]
    Timeout(Duration),

    #[error("viewport override rejected: {0}")]
    Viewport(String),

    #[error(transparent)]
    Cdp(#[from] CdpError),
}

impl ImgError {
    /// Failures that mean the browser process or its command channel is
    /// gone. The cached handle must be discarded so the next request
    /// relaunches instead of hitting a dead session again.
    pub fn is_fatal_session(&self) -> bool {
        matches!(
            self,
            ImgError::Cdp(
                CdpError::Ws(_)
                    | CdpError::Io(_)
                    | CdpError::ChannelSendError(_)
                    | CdpError::NoResponse
            )
        )
    }
}

impl IntoResponse for ImgError {
    fn into_response(self) -> Response {
        match self {
            ImgError::Validation => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid or missing HTML content." })),
            )
                .into_response(),
            err => {
                tracing::error!("image generation failed: {err}");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Failed to generate image.",
                        "details": err.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_fatal_to_the_session() {
        assert!(ImgError::Cdp(CdpError::NoResponse).is_fatal_session());

        let io = CdpError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert!(ImgError::Cdp(io).is_fatal_session());
    }

    #[test]
    fn request_scoped_failures_keep_the_browser() {
        assert!(!ImgError::Cdp(CdpError::Timeout).is_fatal_session());
        assert!(!ImgError::Validation.is_fatal_session());
        assert!(!ImgError::Launch("no binary".into()).is_fatal_session());
        assert!(!ImgError::Timeout(Duration::from_secs(30)).is_fatal_session());
    }

    #[tokio::test]
    async fn validation_maps_to_the_fixed_400_body() {
        let response = ImgError::Validation.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Invalid or missing HTML content.");
    }

    #[tokio::test]
    async fn render_failures_map_to_500_with_details() {
        let response = ImgError::Launch("spawn failed".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Failed to generate image.");
        assert!(value["details"].as_str().unwrap().contains("spawn failed"));
    }
}
