//! Turns the assorted response payloads AI clients hand back into one
//! displayable string.

use serde_json::Value;

/// Known response layouts, tried in [`EXTRACTION_ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `"text"`
    PlainText,
    /// `{"message": "text"}`
    NestedMessage,
    /// `{"message": {"content": "text"}}`
    NestedContent,
    /// `{"message": {"content": [{"type": "text", "text": "..."}]}}`
    ContentBlocks,
    /// `{"choices": [{"message": {"content": "text"}}]}`
    ChoicesStyle,
}

pub const EXTRACTION_ORDER: [ResponseShape; 5] = [
    ResponseShape::PlainText,
    ResponseShape::NestedMessage,
    ResponseShape::NestedContent,
    ResponseShape::ContentBlocks,
    ResponseShape::ChoicesStyle,
];

impl ResponseShape {
    pub fn extract(self, raw: &Value) -> Option<String> {
        let text = match self {
            ResponseShape::PlainText => raw.as_str().map(str::to_string),
            ResponseShape::NestedMessage => raw
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            ResponseShape::NestedContent => raw
                .get("message")
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string),
            ResponseShape::ContentBlocks => raw
                .get("message")
                .and_then(|message| message.get("content"))
                .and_then(Value::as_array)
                .map(|blocks| concat_text_blocks(blocks)),
            ResponseShape::ChoicesStyle => raw
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.get("message"))
                .and_then(|message| message.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        text.filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    /// `None` when no known layout matched and the payload was serialized.
    pub shape: Option<ResponseShape>,
}

/// Never yields an empty string: unmatched payloads are serialized whole.
pub fn normalize_response(raw: &Value) -> NormalizedText {
    for shape in EXTRACTION_ORDER {
        if let Some(text) = shape.extract(raw) {
            return NormalizedText {
                text,
                shape: Some(shape),
            };
        }
    }
    NormalizedText {
        text: stringify_raw(raw),
        shape: None,
    }
}

/// Image clients answer with a bare URL or an object carrying one.
pub fn extract_image_source(raw: &Value) -> String {
    if let Some(url) = raw
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return url.to_string();
    }
    for key in ["src", "url", "image_url"] {
        if let Some(url) = raw
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return url.to_string();
        }
    }
    if let Some(url) = raw
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return url.to_string();
    }
    stringify_raw(raw)
}

fn concat_text_blocks(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<String>()
}

fn stringify_raw(raw: &Value) -> String {
    let text = serde_json::to_string(raw).unwrap_or_default();
    if text.trim().is_empty() {
        return "null".to_string();
    }
    text
}
