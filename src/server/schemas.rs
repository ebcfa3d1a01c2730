//! Inbound request bodies, their validation, and the extractor that runs it.
//!
//! Bodies are deserialized loosely (optional fields, roles as plain strings)
//! and then checked field by field so a rejection can name every violation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ApiError, FieldError};
use crate::transcript::{fold, Message, Role};
use crate::upstream::GenerationRequest;

pub const MIN_OUTPUT_TOKENS: i64 = 1;
pub const MAX_OUTPUT_TOKENS: i64 = 8192;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.3;

/// Body of `POST /prompt` and `POST /stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessageBody>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageBody {
    pub role: String,
    pub content: String,
}

/// Sampling limits shared by every request shape, with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_output_tokens: u32,
    pub temperature: f64,
}

/// A validated `/prompt` or `/stream` body.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInput {
    pub prompt: String,
    pub model: Option<String>,
    pub system: Option<String>,
    pub limits: Limits,
}

/// A validated `/chat` body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInput {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub limits: Limits,
}

/// Field-level validation of a deserialized body.
pub trait Validate {
    type Output;

    fn validate(self) -> Result<Self::Output, Vec<FieldError>>;
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn check_limits(
    max_output_tokens: Option<i64>,
    temperature: Option<f64>,
    errors: &mut Vec<FieldError>,
) -> Limits {
    let max_output_tokens = match max_output_tokens {
        Some(n) if !(MIN_OUTPUT_TOKENS..=MAX_OUTPUT_TOKENS).contains(&n) => {
            errors.push(FieldError::new(
                &["max_output_tokens"],
                format!("must be between {MIN_OUTPUT_TOKENS} and {MAX_OUTPUT_TOKENS}, got {n}"),
                "range",
            ));
            DEFAULT_MAX_OUTPUT_TOKENS
        }
        // Range-checked above.
        Some(n) => n as u32,
        None => DEFAULT_MAX_OUTPUT_TOKENS,
    };

    let temperature = match temperature {
        Some(t) if !t.is_finite() || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t) => {
            errors.push(FieldError::new(
                &["temperature"],
                format!("must be between {MIN_TEMPERATURE:.1} and {MAX_TEMPERATURE:.1}, got {t}"),
                "range",
            ));
            DEFAULT_TEMPERATURE
        }
        // Zero counts as unset.
        Some(t) if t == 0.0 => DEFAULT_TEMPERATURE,
        Some(t) => t,
        None => DEFAULT_TEMPERATURE,
    };

    Limits {
        max_output_tokens,
        temperature,
    }
}

impl Validate for PromptRequest {
    type Output = PromptInput;

    fn validate(self) -> Result<PromptInput, Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.prompt.is_empty() {
            errors.push(FieldError::new(&["prompt"], "must not be empty", "missing"));
        }
        let limits = check_limits(self.max_output_tokens, self.temperature, &mut errors);

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(PromptInput {
            prompt: self.prompt,
            model: non_empty(self.model),
            system: non_empty(self.system),
            limits,
        })
    }
}

impl Validate for ChatRequest {
    type Output = ChatInput;

    fn validate(self) -> Result<ChatInput, Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.messages.is_empty() {
            errors.push(FieldError::new(&["messages"], "must contain at least one message", "missing"));
        }

        let mut messages = Vec::with_capacity(self.messages.len());
        for (index, message) in self.messages.into_iter().enumerate() {
            match message.role.parse::<Role>() {
                Ok(role) => messages.push(Message::new(role, message.content)),
                Err(_) => errors.push(FieldError::new(
                    &["messages", index.to_string().as_str(), "role"],
                    format!(
                        "role must be one of system, developer, user, assistant; got {:?}",
                        message.role
                    ),
                    "enum",
                )),
            }
        }

        let limits = check_limits(self.max_output_tokens, self.temperature, &mut errors);

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ChatInput {
            messages,
            model: non_empty(self.model),
            limits,
        })
    }
}

impl PromptInput {
    /// Build the upstream request: the prompt is the input, `system` the instructions.
    pub fn into_generation(self, default_model: &str) -> GenerationRequest {
        GenerationRequest {
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            instructions: self.system,
            input: self.prompt,
            temperature: self.limits.temperature,
            max_output_tokens: self.limits.max_output_tokens,
        }
    }
}

impl ChatInput {
    /// Build the upstream request from the folded transcript.
    pub fn into_generation(self, default_model: &str) -> GenerationRequest {
        let folded = fold(&self.messages);
        GenerationRequest {
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            instructions: folded.instructions,
            input: folded.conversation,
            temperature: self.limits.temperature,
            max_output_tokens: self.limits.max_output_tokens,
        }
    }
}

/// JSON extractor that also runs [`Validate`], rejecting with a 422.
pub struct ValidatedJson<T: Validate>(pub T::Output);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: Validate + DeserializeOwned + Send,
    T::Output: Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(body) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(vec![rejection_to_field_error(&rejection)]))?;

        body.validate().map(ValidatedJson).map_err(ApiError::Validation)
    }
}

fn rejection_to_field_error(rejection: &JsonRejection) -> FieldError {
    let text = rejection.body_text();
    let kind = match rejection {
        JsonRejection::JsonDataError(_) => match missing_field_loc(&text) {
            Some(loc) => {
                let loc: Vec<&str> = loc.iter().map(String::as_str).collect();
                return FieldError::new(&loc, "field required", "missing");
            }
            None => "value_error",
        },
        JsonRejection::JsonSyntaxError(_) => "json_invalid",
        JsonRejection::MissingJsonContentType(_) => "content_type",
        _ => "body",
    };
    FieldError::new(&[], text, kind)
}

/// Location of a missing required field, from a data error such as
/// "...: messages[0]: missing field `content` at line 1 column 30".
fn missing_field_loc(text: &str) -> Option<Vec<String>> {
    let (head, tail) = text.split_once("missing field `")?;
    let (field, _) = tail.split_once('`')?;

    // Any path to the enclosing object sits between the last two ": ".
    let parent = head
        .strip_suffix(": ")
        .and_then(|h| h.rsplit_once(": ").map(|(_, path)| path))
        .filter(|path| !path.contains(' '))
        .unwrap_or_default();

    let mut loc: Vec<String> = parent
        .split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    loc.push(field.to_string());
    Some(loc)
}
