use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::sanitize_filename;
use crate::error::{ApiError, ApiResult};
use crate::identity::resolve;
use crate::imaging::reencode_jpeg;
use crate::interpret::Suggestion;
use crate::state::AppState;

/// Serve a generated image by filename.
pub async fn serve_generated(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let filename = sanitize_filename(&filename)?;
    let path = state.generated_dir().join(filename);
    let bytes = tokio::fs::read(&path).await.map_err(|_| {
        tracing::warn!(file = %path.display(), "generated image not found");
        ApiError::NotFound
    })?;

    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    };
    Ok(([(CONTENT_TYPE, mime)], bytes).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SaveResultsRequest {
    pub result_image: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

/// Prepare a result for download: verify the generated file, attach it to
/// the caller's latest redesign record, and mint a single-use download
/// token. The suggestions come back formatted for the clipboard.
pub async fn save_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SaveResultsRequest>,
) -> ApiResult<impl IntoResponse> {
    let Some(filename) = body.result_image.strip_prefix("/generated/") else {
        return Err(ApiError::InvalidInput(
            "result_image must be a /generated/ URL".to_string(),
        ));
    };
    let filename = sanitize_filename(filename)?;
    let path = state.generated_dir().join(filename);
    if !path.exists() {
        tracing::warn!(file = %path.display(), "result image not found");
        return Err(ApiError::NotFound);
    }

    let mut clipboard = String::new();
    for (i, suggestion) in body.suggestions.iter().enumerate() {
        clipboard.push_str(&format!(
            "{}. {}\n{}\n\n",
            i + 1,
            suggestion.title,
            suggestion.description
        ));
    }

    let identity = resolve(&headers, &state.signer);
    if let Some(record) = state.records.latest_for(&identity).await? {
        state
            .records
            .attach_result_image(record.id, &body.result_image)
            .await?;
    }

    let token = state.downloads.issue(path);
    Ok(Json(json!({
        "success": true,
        "message": "Image ready for download",
        "clipboard_content": clipboard,
        "download_url": format!("/api/download/{token}"),
    })))
}

/// Claim a download token and stream the image as a forced JPEG attachment.
/// Tokens are single use; a second request 404s.
pub async fn download(
    State(state): State<AppState>,
    Path(download_id): Path<String>,
) -> ApiResult<Response> {
    let Some(path) = state.downloads.claim(&download_id) else {
        return Err(ApiError::NotFound);
    };
    let bytes = tokio::fs::read(&path).await.map_err(|_| ApiError::NotFound)?;

    let quality = state.config.jpeg_quality;
    let jpeg = tokio::task::spawn_blocking(move || reencode_jpeg(&bytes, quality))
        .await
        .map_err(|e| ApiError::Internal(format!("image task failed: {e}")))??;

    let filename = format!(
        "room_redesign_{}.jpg",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    Ok((
        [
            (CONTENT_TYPE, "image/jpeg".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        jpeg,
    )
        .into_response())
}
