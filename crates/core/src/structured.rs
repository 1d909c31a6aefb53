//! Structured (JSON) model output.
//!
//! Models often wrap JSON in markdown fences or surround it with prose.
//! These helpers find the JSON payload and deserialize it.

use serde::de::DeserializeOwned;

/// Locate the JSON payload inside a model reply.
///
/// Prefers a ```json fence, then any fence, then the outermost `{...}` span.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some(body) = text.split("```json").nth(1).and_then(|s| s.split("```").next()) {
        return body.trim();
    }
    if let Some(body) = text.split("```").nth(1) {
        let body = body.trim();
        if body.starts_with('{') || body.starts_with('[') {
            return body;
        }
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Deserialize the JSON payload of a model reply.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(text))
}
