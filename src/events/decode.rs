//! Lenient JSON decoding for model-generated event payloads.
//!
//! Models asked for "JSON only" still wrap it in Markdown fences or a line of
//! prose. Decoding strips the fence, falls back to the outermost `{..}` span,
//! and checks required keys. Anything that still fails is replaced by a
//! caller-supplied fallback payload.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Why a model reply could not be used as an event payload.
#[derive(Debug, thiserror::Error)]
pub enum MalformedOutput {
    #[error("provider output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("provider output is not a JSON object")]
    NotObject,
    #[error("provider output is missing `{0}`")]
    MissingKey(String),
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*(?:```|$)").ok())
        .as_ref()
}

/// Remove a leading Markdown code fence (```` ```json ```` or bare ```` ``` ````).
///
/// Text without a leading fence is returned trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    fence_regex()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |body| body.as_str().trim())
}

fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse `raw` as a JSON object carrying every key in `required`.
pub fn decode_object(raw: &str, required: &[&str]) -> Result<Map<String, Value>, MalformedOutput> {
    let text = strip_code_fence(raw);
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(err) => match embedded_object(text).filter(|inner| *inner != text) {
            Some(inner) => serde_json::from_str::<Value>(inner).map_err(|_| err)?,
            None => return Err(err.into()),
        },
    };

    let Value::Object(map) = value else {
        return Err(MalformedOutput::NotObject);
    };

    if let Some(missing) = required.iter().find(|key| !map.contains_key(**key)) {
        return Err(MalformedOutput::MissingKey((*missing).to_string()));
    }

    Ok(map)
}

/// Decode `raw`, substituting `fallback()` when it is unusable.
///
/// Malformed output is logged and never surfaced to the caller.
pub fn decode_with_fallback(
    raw: &str,
    required: &[&str],
    fallback: impl FnOnce() -> Value,
) -> Value {
    match decode_object(raw, required) {
        Ok(map) => Value::Object(map),
        Err(err) => {
            tracing::warn!(chars = raw.chars().count(), "Using fallback event payload: {err}");
            fallback()
        }
    }
}
