use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Provider, UpstreamRequest};
use crate::error::{ApiError, ApiResult};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Request builder for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    text_model: String,
    image_model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: String, text_model: String, image_model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            text_model,
            image_model,
            timeout,
        }
    }

    fn generation_config() -> Value {
        json!({
            "temperature": 1,
            "topP": 0.95,
            "topK": 40,
            "maxOutputTokens": 8192,
        })
    }

    /// Text-only chat request.
    pub fn text_request(&self, message: &str) -> UpstreamRequest {
        UpstreamRequest {
            provider: Provider::Gemini,
            url: format!(
                "{GEMINI_BASE}/{}:generateContent?key={}",
                self.text_model, self.api_key
            ),
            headers: Vec::new(),
            payload: json!({
                "contents": [{
                    "role": "user",
                    "parts": [{"text": message}],
                }],
                "generationConfig": Self::generation_config(),
            }),
            timeout: self.timeout,
            max_retries: 2,
        }
    }

    /// Streaming image-edit request: one inline image plus an instruction,
    /// with image+text response modalities.
    pub fn stream_edit_request(&self, image: &[u8], mime: &str, message: &str) -> UpstreamRequest {
        let mut config = Self::generation_config();
        config["responseModalities"] = json!(["image", "text"]);

        UpstreamRequest {
            provider: Provider::Gemini,
            url: format!(
                "{GEMINI_BASE}/{}:streamGenerateContent?alt=sse&key={}",
                self.image_model, self.api_key
            ),
            headers: Vec::new(),
            payload: json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"inline_data": {"mime_type": mime, "data": BASE64.encode(image)}},
                        {"text": message},
                    ],
                }],
                "generationConfig": config,
            }),
            timeout: self.timeout,
            max_retries: 2,
        }
    }
}

/// Accumulates a Gemini image-generation stream: text fragments in arrival
/// order, inline image payloads persisted under the generated directory and
/// recorded as public `/generated/...` references.
pub struct StreamCollector {
    generated_dir: PathBuf,
    pub text: String,
    pub images: Vec<String>,
}

impl StreamCollector {
    pub fn new(generated_dir: impl Into<PathBuf>) -> Self {
        Self {
            generated_dir: generated_dir.into(),
            text: String::new(),
            images: Vec::new(),
        }
    }

    /// Absorb one streamed chunk. Chunks without candidate parts are skipped.
    pub fn absorb(&mut self, chunk: &Value) -> ApiResult<()> {
        let Some(parts) = chunk
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        else {
            return Ok(());
        };

        for part in parts {
            let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
            if let Some(inline) = inline {
                let mime = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ApiError::MalformedUpstreamResponse(
                            "inline image chunk without data".to_string(),
                        )
                    })?;
                let bytes = BASE64.decode(data).map_err(|e| {
                    ApiError::MalformedUpstreamResponse(format!("invalid inline image data: {e}"))
                })?;

                let filename = format!("image_{}{}", uuid::Uuid::new_v4(), extension_for(mime));
                let path = self.generated_dir.join(&filename);
                std::fs::write(&path, &bytes)?;
                tracing::info!(file = %path.display(), size = bytes.len(), "generated image saved");
                self.images.push(format!("/generated/{filename}"));
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                self.text.push_str(text);
            }
        }
        Ok(())
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => ".jpg",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        _ => ".png",
    }
}

/// Copy a normalized preview image into the generated directory and return
/// its public reference.
pub fn persist_preview(generated_dir: &Path, bytes: &[u8]) -> ApiResult<String> {
    let filename = format!("image_preview_{}.jpg", uuid::Uuid::new_v4());
    std::fs::write(generated_dir.join(&filename), bytes)?;
    Ok(format!("/generated/{filename}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GeminiClient {
        GeminiClient::new(
            "k".into(),
            "gemini-1.5-flash".into(),
            "gemini-2.0-flash-exp-image-generation".into(),
            Duration::from_secs(90),
        )
    }

    #[test]
    fn text_request_carries_message_and_model() {
        let req = client().text_request("hello");
        assert!(req.url.contains("gemini-1.5-flash:generateContent"));
        assert_eq!(req.payload["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(req.max_retries, 2);
    }

    #[test]
    fn stream_request_is_sse_with_image_modality() {
        let req = client().stream_edit_request(b"img", "image/jpeg", "make it blue");
        assert!(req.url.contains("streamGenerateContent?alt=sse"));
        assert_eq!(
            req.payload["generationConfig"]["responseModalities"],
            serde_json::json!(["image", "text"])
        );
        assert_eq!(
            req.payload["contents"][0]["parts"][0]["inline_data"]["mime_type"],
            "image/jpeg"
        );
    }

    #[test]
    fn collector_accumulates_text_and_persists_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = StreamCollector::new(dir.path());

        collector
            .absorb(&serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "Here is "}]}}]
            }))
            .unwrap();
        collector
            .absorb(&serde_json::json!({
                "candidates": [{"content": {"parts": [{
                    "inlineData": {"mimeType": "image/png", "data": BASE64.encode(b"fakepng")}
                }]}}]
            }))
            .unwrap();
        collector
            .absorb(&serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "your room."}]}}]
            }))
            .unwrap();
        // chunk without parts is skipped
        collector.absorb(&serde_json::json!({"usage": {}})).unwrap();

        assert_eq!(collector.text, "Here is your room.");
        assert_eq!(collector.images.len(), 1);
        assert!(collector.images[0].starts_with("/generated/image_"));
        assert!(collector.images[0].ends_with(".png"));

        let saved = dir.path().read_dir().unwrap().count();
        assert_eq!(saved, 1);
    }

    #[test]
    fn collector_rejects_undecodable_inline_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = StreamCollector::new(dir.path());
        let err = collector
            .absorb(&serde_json::json!({
                "candidates": [{"content": {"parts": [{
                    "inlineData": {"mimeType": "image/png", "data": "!!not-base64!!"}
                }]}}]
            }))
            .unwrap_err();
        assert!(matches!(err, ApiError::MalformedUpstreamResponse(_)));
    }
}
