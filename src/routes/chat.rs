use axum::extract::{Multipart, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::imaging::{normalize_upload, NormalizeOptions, NormalizedImage};
use crate::providers::executor::{self, RetryPolicy};
use crate::interpret::{interpreter_for, ResponseInterpreter};
use crate::providers::gemini::{persist_preview, StreamCollector};
use crate::providers::Provider;
use crate::state::AppState;

/// Message used by the frontend to request HEIC preview conversion without
/// triggering image generation.
const PREVIEW_MESSAGE: &str = "Processing HEIC preview";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

/// Text-only chat against the Gemini text model.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.message.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message is required".to_string()));
    }

    let req = state.gemini.text_request(&body.message);
    let response = executor::execute(&req, &RetryPolicy::default()).await?;
    let text = interpreter_for(Provider::Gemini).extract_text(&response)?;

    Ok(Json(json!({"text": text, "images": []})))
}

/// Image-editing chat: normalize the upload, then stream the Gemini image
/// model, persisting generated images as they arrive. The preview message
/// short-circuits before any model call and just returns the normalized
/// image.
pub async fn chat_with_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut message = String::new();
    let mut upload: Option<(Vec<u8>, String, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("message") => {
                message = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("Invalid message field: {e}")))?;
            }
            Some("image") => {
                let filename = field.file_name().unwrap_or("upload.jpg").to_string();
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("Invalid image field: {e}")))?;
                upload = Some((bytes.to_vec(), filename, content_type));
            }
            _ => {}
        }
    }

    let Some((bytes, filename, content_type)) = upload else {
        return Err(ApiError::InvalidInput("No image provided".to_string()));
    };
    if bytes.len() > state.config.max_upload_bytes() {
        return Err(ApiError::InvalidInput(format!(
            "File size too large (max {}MB)",
            state.config.max_upload_mb
        )));
    }

    let normalized = normalize_blocking(&state, bytes, filename, content_type).await?;

    if message == PREVIEW_MESSAGE {
        let url = persist_preview(&state.generated_dir(), &normalized.bytes)?;
        return Ok(Json(json!({"text": "Preview processed", "images": [url]})));
    }

    let req = state
        .gemini
        .stream_edit_request(&normalized.bytes, "image/jpeg", &message);
    let mut collector = StreamCollector::new(state.generated_dir());
    executor::execute_streaming(&req, &RetryPolicy::default(), |chunk| {
        collector.absorb(&chunk)
    })
    .await?;

    Ok(Json(json!({
        "text": collector.text,
        "images": collector.images,
    })))
}

/// Run upload normalization off the async runtime.
pub(crate) async fn normalize_blocking(
    state: &AppState,
    bytes: Vec<u8>,
    filename: String,
    content_type: Option<String>,
) -> ApiResult<NormalizedImage> {
    let opts = NormalizeOptions {
        jpeg_quality: state.config.jpeg_quality,
        max_dimension: state.config.max_dimension,
    };
    let normalized = tokio::task::spawn_blocking(move || {
        normalize_upload(&bytes, &filename, content_type.as_deref(), &opts)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("image task failed: {e}")))??;
    Ok(normalized)
}
