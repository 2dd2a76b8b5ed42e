//! API route handlers
//!
//! This module contains all HTTP endpoint implementations for the redesign
//! server. Routes are organized by functionality:
//!
//! - `health`: Health check
//! - `chat`: Gemini text chat and image editing
//! - `suggestions`: Claude-backed redesign suggestions
//! - `files`: Generated image serving, save-results and downloads
//! - `usage`: Anonymous quota introspection
//! - `auth`: Registration, login and account info

pub mod auth;
pub mod chat;
pub mod files;
pub mod health;
pub mod suggestions;
pub mod usage;

use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;

/// 404 handler for unmatched routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "code": "NOT_FOUND",
                "message": "Endpoint not found",
            }
        })),
    )
}

/// Build a JSON response, attaching a Set-Cookie header when an anonymous
/// id was minted during identity resolution.
pub(crate) fn json_with_cookie(status: StatusCode, body: Value, cookie: Option<String>) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(SET_COOKIE, value);
        }
    }
    response
}

/// Reject path segments that could escape the serving directory.
pub(crate) fn sanitize_filename(name: &str) -> Result<&str, ApiError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ApiError::NotFound);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_sanitization_blocks_traversal() {
        assert!(sanitize_filename("image_abc.png").is_ok());
        assert!(sanitize_filename("../secret").is_err());
        assert!(sanitize_filename("a/b.png").is_err());
        assert!(sanitize_filename("a\\b.png").is_err());
        assert!(sanitize_filename("").is_err());
    }
}
