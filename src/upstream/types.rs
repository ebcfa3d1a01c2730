//! Wire shapes for the upstream Responses API and the adapter's own request/result types.

use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// A normalized generation request, built per inbound call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,

    /// System-level guidance. Omitted from the wire body when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    pub input: String,

    pub temperature: f64,

    pub max_output_tokens: u32,
}

/// Body actually posted upstream.
#[derive(Debug, Serialize)]
pub(crate) struct ResponsesBody<'a> {
    #[serde(flatten)]
    pub request: &'a GenerationRequest,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Outcome of a completed, non-streaming generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub model: String,
    pub output: String,
}

/// Non-streaming response payload. Only the fields text extraction needs.
#[derive(Debug, Default, Deserialize)]
pub struct ResponseObject {
    #[serde(default)]
    pub output_text: Option<String>,

    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub text: Option<TextField>,

    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// Text carried either inline or wrapped as `{"value": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Plain(String),
    Wrapped { value: String },
}

impl TextField {
    fn as_str(&self) -> &str {
        match self {
            TextField::Plain(s) => s,
            TextField::Wrapped { value } => value,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub text: Option<TextField>,
}

impl ContentPart {
    /// Reasoning and other non-output parts also carry `text`; skip them.
    fn output_text(&self) -> Option<&TextField> {
        match self.kind.as_deref() {
            None | Some("output_text") | Some("text") => self.text.as_ref(),
            Some(_) => None,
        }
    }
}

impl ResponseObject {
    /// Plain text of the response.
    ///
    /// A non-blank consolidated `output_text` wins. Otherwise every text
    /// fragment of every output item is newline-joined in order. No text at
    /// all yields an empty string rather than an error.
    pub fn extract_text(&self) -> String {
        if let Some(text) = &self.output_text {
            if !text.trim().is_empty() {
                return text.clone();
            }
        }

        self.output
            .iter()
            .flat_map(|item| {
                item.text
                    .iter()
                    .chain(item.content.iter().filter_map(ContentPart::output_text))
            })
            .map(TextField::as_str)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Upstream error envelope: `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

/// Event decoded from the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// `response.output_text.delta`
    TextDelta(String),

    /// `response.completed`
    Completed,

    /// Any other event kind.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawStreamEvent {
    #[serde(rename = "type", default)]
    kind: String,

    /// Kept loose: only text deltas are guaranteed to carry a string.
    #[serde(default)]
    delta: Option<serde_json::Value>,

    /// Set on `error` events.
    #[serde(default)]
    message: Option<String>,

    /// Set on `response.*` lifecycle events.
    #[serde(default)]
    response: Option<RawStreamResponse>,
}

#[derive(Debug, Deserialize)]
struct RawStreamResponse {
    #[serde(default)]
    error: Option<ErrorDetail>,
}

impl UpstreamEvent {
    /// Decode one SSE `data:` payload.
    ///
    /// `error` and `response.failed` events become [`UpstreamError::Stream`].
    pub fn parse(data: &str) -> Result<Self, UpstreamError> {
        let raw: RawStreamEvent = serde_json::from_str(data)?;
        match raw.kind.as_str() {
            "response.output_text.delta" => Ok(UpstreamEvent::TextDelta(
                raw.delta
                    .as_ref()
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )),
            "response.completed" => Ok(UpstreamEvent::Completed),
            "error" => Err(UpstreamError::Stream(
                raw.message.unwrap_or_else(|| "upstream reported an error".to_string()),
            )),
            "response.failed" => Err(UpstreamError::Stream(
                raw.response
                    .and_then(|r| r.error)
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "upstream response failed".to_string()),
            )),
            _ => Ok(UpstreamEvent::Other(raw.kind)),
        }
    }
}
