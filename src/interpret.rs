//! Upstream response interpretation.
//!
//! Provider-specific body shapes are isolated behind `ResponseInterpreter`
//! adapters selected by provider id; the shared free-text machinery turns
//! whatever came back into the endpoint's fixed suggestion cardinality,
//! padding with deterministic fallbacks or truncating as needed. Complete
//! parse failure yields a full fallback set, never an error — only the
//! strict-JSON mode surfaces `MalformedUpstreamResponse`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::providers::Provider;

/// One titled redesign suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub description: String,
}

/// Room/style context used to template deterministic fallback content.
#[derive(Debug, Clone, Default)]
pub struct FallbackContext {
    pub room_type: String,
    pub style: String,
}

impl FallbackContext {
    pub fn new(room_type: &str, style: &str) -> Self {
        Self {
            room_type: if room_type.is_empty() {
                "room".to_string()
            } else {
                room_type.to_string()
            },
            style: if style.is_empty() {
                "modern".to_string()
            } else {
                style.to_string()
            },
        }
    }
}

/// Extracts the assistant text from a provider-shaped response body.
pub trait ResponseInterpreter: Send + Sync {
    fn extract_text(&self, body: &Value) -> ApiResult<String>;
}

/// Anthropic messages shape: `content[*].text`.
pub struct ClaudeInterpreter;

impl ResponseInterpreter for ClaudeInterpreter {
    fn extract_text(&self, body: &Value) -> ApiResult<String> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ApiError::MalformedUpstreamResponse("missing content array".to_string())
            })?;
        let text: String = blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ApiError::MalformedUpstreamResponse(
                "no text blocks in content".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Gemini generateContent shape: `candidates[0].content.parts[*].text`.
pub struct GeminiInterpreter;

impl ResponseInterpreter for GeminiInterpreter {
    fn extract_text(&self, body: &Value) -> ApiResult<String> {
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ApiError::MalformedUpstreamResponse("missing candidate parts".to_string())
            })?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(ApiError::MalformedUpstreamResponse(
                "no text parts in candidate".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Select the interpreter for a provider.
pub fn interpreter_for(provider: Provider) -> &'static dyn ResponseInterpreter {
    match provider {
        Provider::Claude => &ClaudeInterpreter,
        Provider::Gemini => &GeminiInterpreter,
    }
}

/// True when a line opens a new numbered block ("1." / "12)").
fn is_numbered_boundary(line: &str) -> bool {
    let mut saw_digit = false;
    for c in line.chars() {
        if c.is_ascii_digit() {
            saw_digit = true;
            continue;
        }
        return saw_digit && (c == '.' || c == ')');
    }
    false
}

/// Strip a leading "N." / "N)" numbering token.
fn strip_numbering(line: &str) -> &str {
    if !is_numbered_boundary(line) {
        return line;
    }
    let after_digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    after_digits[1..].trim_start()
}

/// Strip an optional leading label like "Title:" (case-insensitive).
fn strip_label<'a>(line: &'a str, label: &str) -> &'a str {
    // get() refuses a slice that would land inside a multi-byte character
    match line.get(..label.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(label) => line[label.len()..].trim_start(),
        _ => line,
    }
}

/// Split free text into blocks at numbered boundaries. Lines before the
/// first boundary are discarded (typically a preamble sentence).
fn split_blocks(text: &str) -> Vec<Vec<String>> {
    let mut blocks: Vec<Vec<String>> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if is_numbered_boundary(line) {
            blocks.push(vec![line.to_string()]);
        } else if let Some(current) = blocks.last_mut() {
            current.push(line.to_string());
        }
    }
    blocks
}

fn fallback_item(ctx: &FallbackContext) -> String {
    format!(
        "Consider updating the {} with elements that match the {} style.",
        ctx.room_type, ctx.style
    )
}

fn fallback_suggestion(index: usize, ctx: &FallbackContext) -> Suggestion {
    // Cycle a small deterministic template set so padded entries differ
    let templates: [(&str, String); 3] = [
        (
            "Refresh the color palette",
            format!(
                "Introduce tones typical of {} interiors to give the {} a cohesive base.",
                ctx.style, ctx.room_type
            ),
        ),
        (
            "Rework the furniture layout",
            format!(
                "Rearrange the main pieces in the {} to open up circulation and fit the {} look.",
                ctx.room_type, ctx.style
            ),
        ),
        (
            "Layer in textiles and lighting",
            format!(
                "Add rugs, curtains and warm lighting that suit a {} {}.",
                ctx.style, ctx.room_type
            ),
        ),
    ];
    let (title, description) = &templates[index % templates.len()];
    Suggestion {
        title: title.to_string(),
        description: description.clone(),
    }
}

/// Interpret free text into exactly `n` plain suggestion strings, numbering
/// stripped. Too few extracted items are padded with templated fallback
/// sentences; too many are truncated in order.
pub fn extract_numbered_items(text: &str, n: usize, ctx: &FallbackContext) -> Vec<String> {
    let mut items: Vec<String> = split_blocks(text)
        .into_iter()
        .map(|lines| {
            let mut joined = String::new();
            for (i, line) in lines.iter().enumerate() {
                let line = if i == 0 { strip_numbering(line) } else { line };
                if !joined.is_empty() {
                    joined.push(' ');
                }
                joined.push_str(line);
            }
            joined
        })
        .filter(|s| !s.is_empty())
        .collect();

    if items.len() < n {
        tracing::warn!(got = items.len(), expected = n, "padding short suggestion list");
        while items.len() < n {
            items.push(fallback_item(ctx));
        }
    } else if items.len() > n {
        tracing::warn!(got = items.len(), expected = n, "truncating long suggestion list");
        items.truncate(n);
    }
    items
}

/// Interpret free text into exactly `n` titled suggestions. A body that is
/// itself a well-formed JSON array of `n` suggestions is taken verbatim.
/// Otherwise the first line of each numbered block is the title (numbering
/// and optional "Title:" label stripped), the remaining lines joined form
/// the description (optional "Description:" label stripped). Blocks missing
/// either part are discarded before cardinality normalization.
pub fn interpret_suggestions(text: &str, n: usize, ctx: &FallbackContext) -> Vec<Suggestion> {
    // Models sometimes answer with a JSON array despite the free-text
    // prompt; take the clean parse when it matches exactly.
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if let Ok(parsed) = interpret_strict_json(&value, n) {
            return parsed;
        }
    }

    let mut suggestions: Vec<Suggestion> = split_blocks(text)
        .into_iter()
        .filter_map(|lines| {
            let first = lines.first()?;
            let title = strip_label(strip_numbering(first), "Title:")
                .trim_matches(|c| c == '*' || c == '#')
                .trim()
                .to_string();
            let description = {
                let joined = lines[1..].join(" ");
                strip_label(joined.trim(), "Description:").trim().to_string()
            };
            if title.is_empty() || description.is_empty() {
                return None;
            }
            Some(Suggestion { title, description })
        })
        .collect();

    if suggestions.len() < n {
        tracing::warn!(got = suggestions.len(), expected = n, "padding short suggestion list");
        let mut index = 0;
        while suggestions.len() < n {
            suggestions.push(fallback_suggestion(index, ctx));
            index += 1;
        }
    } else if suggestions.len() > n {
        suggestions.truncate(n);
    }
    suggestions
}

/// Strict JSON mode: the body must be an array of exactly `n` objects each
/// carrying non-empty `title` and `description`. Anything else is a
/// malformed-response error (surfaced as 500 on strict endpoints).
pub fn interpret_strict_json(body: &Value, n: usize) -> ApiResult<Vec<Suggestion>> {
    let items = body.as_array().ok_or_else(|| {
        ApiError::MalformedUpstreamResponse("expected a top-level array".to_string())
    })?;
    if items.len() != n {
        return Err(ApiError::MalformedUpstreamResponse(format!(
            "expected {n} suggestions, got {}",
            items.len()
        )));
    }
    items
        .iter()
        .map(|item| {
            let suggestion: Suggestion = serde_json::from_value(item.clone()).map_err(|e| {
                ApiError::MalformedUpstreamResponse(format!("bad suggestion object: {e}"))
            })?;
            if suggestion.title.is_empty() || suggestion.description.is_empty() {
                return Err(ApiError::MalformedUpstreamResponse(
                    "empty title or description".to_string(),
                ));
            }
            Ok(suggestion)
        })
        .collect()
}
