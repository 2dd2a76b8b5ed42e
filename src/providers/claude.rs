use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Provider, UpstreamRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request builder for the Anthropic messages API.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    api_key: String,
    model: String,
    api_url: String,
    timeout: Duration,
}

impl ClaudeClient {
    pub fn new(api_key: String, model: String, api_url: String, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            api_url,
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// A user message built from image and text content blocks.
    pub fn messages_request(
        &self,
        content: Vec<Value>,
        max_tokens: u32,
        max_retries: u32,
    ) -> UpstreamRequest {
        UpstreamRequest {
            provider: Provider::Claude,
            url: self.api_url.clone(),
            headers: vec![
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            payload: json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "messages": [{
                    "role": "user",
                    "content": content,
                }],
            }),
            timeout: self.timeout,
            max_retries,
        }
    }

    /// Base64 image content block.
    pub fn image_block(mime: &str, bytes: &[u8]) -> Value {
        json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": mime,
                "data": BASE64.encode(bytes),
            },
        })
    }

    /// Plain text content block.
    pub fn text_block(text: &str) -> Value {
        json!({"type": "text", "text": text})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_request_has_auth_headers_and_model() {
        let client = ClaudeClient::new(
            "sk-test".into(),
            "claude-3-sonnet-20240229".into(),
            "https://api.anthropic.com/v1/messages".into(),
            Duration::from_secs(60),
        );
        let req = client.messages_request(
            vec![
                ClaudeClient::image_block("image/jpeg", b"img"),
                ClaudeClient::text_block("redesign this"),
            ],
            1024,
            2,
        );

        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| *k == "x-api-key" && v == "sk-test"));
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| *k == "anthropic-version" && v == ANTHROPIC_VERSION));
        assert_eq!(req.payload["model"], "claude-3-sonnet-20240229");

        let content = req.payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[1]["text"], "redesign this");
    }
}
