use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use super::json_with_cookie;
use crate::error::{ApiError, ApiResult};
use crate::identity::resolve_or_mint;
use crate::imaging::{shrink_to_limit, ShrinkOptions};
use crate::interpret::{
    extract_numbered_items, interpret_suggestions, interpreter_for as suggestion_interpreter,
    FallbackContext, ResponseInterpreter,
};
use crate::providers::claude::ClaudeClient;
use crate::providers::executor::{self, RetryPolicy};
use crate::providers::Provider;
use crate::routes::chat::normalize_blocking;
use crate::state::AppState;

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
const CLAUDE_MAX_TOKENS: u32 = 1024;
const CLAUDE_MAX_RETRIES: u32 = 2;

/// How one endpoint shapes its suggestion output.
#[derive(Debug, Clone, Copy)]
struct SuggestionSpec {
    count: usize,
    titled: bool,
}

/// Five plain-text redesign suggestions for one room photo.
pub async fn claude_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    run_suggestions(
        state,
        headers,
        multipart,
        SuggestionSpec {
            count: 5,
            titled: false,
        },
    )
    .await
}

/// Three titled suggestions, for the side-by-side comparison view.
pub async fn claude_compare(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    run_suggestions(
        state,
        headers,
        multipart,
        SuggestionSpec {
            count: 3,
            titled: true,
        },
    )
    .await
}

struct SuggestionForm {
    image: Vec<u8>,
    filename: String,
    content_type: Option<String>,
    inspiration: Option<(Vec<u8>, String, Option<String>)>,
    prompt: String,
    room_type: String,
    style: String,
}

async fn read_form(state: &AppState, mut multipart: Multipart) -> ApiResult<SuggestionForm> {
    let mut image: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut inspiration: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut image_data = String::new();
    let mut prompt = String::new();
    let mut room_type = String::new();
    let mut style = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") | Some("image") => {
                let filename = field.file_name().unwrap_or("").to_string();
                if !filename.contains('.') {
                    return Err(ApiError::InvalidInput("Invalid file".to_string()));
                }
                let extension = filename
                    .rsplit('.')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
                    return Err(ApiError::InvalidInput(format!(
                        "File type not allowed. Supported formats: {}",
                        ALLOWED_EXTENSIONS.join(", ")
                    )));
                }
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("Invalid file field: {e}")))?;
                image = Some((bytes.to_vec(), filename, content_type));
            }
            Some("inspiration") => {
                let filename = field.file_name().unwrap_or("inspiration.jpg").to_string();
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::InvalidInput(format!("Invalid inspiration field: {e}"))
                })?;
                inspiration = Some((bytes.to_vec(), filename, content_type));
            }
            Some("imageData") => {
                image_data = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("Invalid imageData field: {e}")))?;
            }
            Some("prompt") => {
                prompt = field.text().await.unwrap_or_default();
            }
            Some("roomType") => {
                room_type = field.text().await.unwrap_or_default().trim().to_string();
            }
            Some("style") => {
                style = field.text().await.unwrap_or_default().trim().to_string();
            }
            _ => {}
        }
    }

    let (bytes, filename, content_type) = match image {
        Some(upload) => upload,
        None if !image_data.is_empty() => {
            // data URL or bare base64
            let encoded = match image_data.split_once(";base64,") {
                Some((header, rest)) => {
                    if !header.starts_with("data:image/") {
                        return Err(ApiError::InvalidInput(
                            "Invalid image data format".to_string(),
                        ));
                    }
                    rest
                }
                None => image_data.as_str(),
            };
            let bytes = BASE64.decode(encoded.trim()).map_err(|_| {
                ApiError::InvalidInput("Invalid image data encoding".to_string())
            })?;
            (bytes, "upload.jpg".to_string(), None)
        }
        None => return Err(ApiError::InvalidInput("No image provided".to_string())),
    };

    if bytes.len() > state.config.max_upload_bytes() {
        return Err(ApiError::InvalidInput(format!(
            "File size too large (max {}MB)",
            state.config.max_upload_mb
        )));
    }

    Ok(SuggestionForm {
        image: bytes,
        filename,
        content_type,
        inspiration,
        prompt,
        room_type,
        style,
    })
}

fn build_prompt(form: &SuggestionForm, spec: SuggestionSpec) -> ApiResult<String> {
    if !form.prompt.is_empty() {
        return Ok(form.prompt.clone());
    }
    if form.room_type.is_empty() {
        return Err(ApiError::InvalidInput("Room type is required".to_string()));
    }
    if form.style.is_empty() {
        return Err(ApiError::InvalidInput("Style is required".to_string()));
    }
    tracing::info!(room_type = %form.room_type, style = %form.style, "redesign request");

    let prompt = if spec.titled {
        let source = if form.inspiration.is_some() {
            "the uploaded room photo, drawing on the second image for inspiration"
        } else {
            "the uploaded image"
        };
        format!(
            "You are a professional interior designer. I need you to redesign a {} in {} style.\n\n\
             Based on {}, suggest {} distinct redesign directions. For each one:\n\
             1. Start with a short title on its own line\n\
             2. Follow with a 1-2 sentence description of the change, including colors and materials\n\n\
             Number each direction (1-{}).",
            form.room_type, form.style, source, spec.count, spec.count
        )
    } else {
        format!(
            "You are a professional interior designer. I need you to redesign a {} in {} style.\n\n\
             Based on the uploaded image, suggest {} specific redesign recommendations. For each suggestion:\n\
             1. Focus on specific, actionable changes\n\
             2. Include details about colors, materials, and furniture layout\n\
             3. Explain why the change works well with the space and style\n\n\
             Number each suggestion (1-{}) and keep each to about 2-3 sentences.",
            form.room_type, form.style, spec.count, spec.count
        )
    };
    Ok(prompt)
}

/// Canonical JPEG within dimension limits, then under the provider's byte
/// ceiling.
async fn normalize_and_bound(
    state: &AppState,
    bytes: Vec<u8>,
    filename: String,
    content_type: Option<String>,
    limit: usize,
) -> ApiResult<Vec<u8>> {
    let normalized = normalize_blocking(state, bytes, filename, content_type).await?;
    let bounded = tokio::task::spawn_blocking(move || {
        shrink_to_limit(
            &normalized.bytes,
            &ShrinkOptions {
                target_bytes: limit,
                ..ShrinkOptions::default()
            },
        )
    })
    .await
    .map_err(|e| ApiError::Internal(format!("image task failed: {e}")))??;
    Ok(bounded)
}

/// Shared flow: gate the caller, normalize and bound the image, call Claude,
/// interpret to the endpoint's fixed cardinality.
async fn run_suggestions(
    state: AppState,
    headers: HeaderMap,
    multipart: Multipart,
    spec: SuggestionSpec,
) -> ApiResult<Response> {
    // Quota gate runs before the body is touched, so exhausted callers get
    // the auth prompt without uploading a full image pipeline's worth of work.
    let (identity, cookie) = resolve_or_mint(&headers, &state.signer);
    state.usage.check(&identity).await?;

    let form = read_form(&state, multipart).await?;
    let prompt = build_prompt(&form, spec)?;
    let ctx = FallbackContext::new(&form.room_type, &form.style);
    let limit = state.config.claude_image_limit;

    let SuggestionForm {
        image,
        filename,
        content_type,
        inspiration,
        room_type,
        style,
        ..
    } = form;

    let bounded = normalize_and_bound(&state, image, filename, content_type, limit).await?;
    let inspiration_bounded = match inspiration {
        Some((bytes, filename, content_type)) => {
            Some(normalize_and_bound(&state, bytes, filename, content_type, limit).await?)
        }
        None => None,
    };

    let mut content = vec![ClaudeClient::image_block("image/jpeg", &bounded)];
    if let Some(inspiration) = &inspiration_bounded {
        content.push(ClaudeClient::image_block("image/jpeg", inspiration));
    }
    content.push(ClaudeClient::text_block(&prompt));
    let req = state
        .claude
        .messages_request(content, CLAUDE_MAX_TOKENS, CLAUDE_MAX_RETRIES);
    let response = executor::execute(&req, &RetryPolicy::default()).await?;

    // An unrecognizable 200 body falls through to the template suggestions
    // below rather than failing the request.
    let text = match suggestion_interpreter(Provider::Claude).extract_text(&response) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "unusable suggestion response, serving fallbacks");
            String::new()
        }
    };
    tracing::info!(chars = text.len(), "suggestion text received");

    // The run counts against the quota only once the model call has come
    // back; a failed upstream call must not consume a redesign attempt.
    let upload_name = format!("{}.jpg", uuid::Uuid::new_v4());
    let upload_path = state.uploads_dir().join(&upload_name);
    tokio::fs::write(&upload_path, &bounded).await?;
    state
        .usage
        .record(
            &identity,
            &room_type,
            &style,
            Some(upload_path.to_string_lossy().into_owned()),
        )
        .await?;

    let body = if spec.titled {
        json!({"suggestions": interpret_suggestions(&text, spec.count, &ctx)})
    } else {
        json!({"suggestions": extract_numbered_items(&text, spec.count, &ctx)})
    };
    Ok(json_with_cookie(StatusCode::OK, body, cookie))
}

/// Connectivity probe against the Claude API.
pub async fn test_claude(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let req = state.claude.messages_request(
        vec![ClaudeClient::text_block(
            "Hello! Please respond with a short greeting.",
        )],
        100,
        0,
    );
    let response = executor::execute(&req, &RetryPolicy::default()).await?;
    let text = suggestion_interpreter(Provider::Claude).extract_text(&response)?;

    Ok(Json(json!({
        "status": "success",
        "model": state.claude.model(),
        "message": text,
    })))
}
