//! Error types shared across the gateway and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Stable error code reported for any failed generation.
pub const GENERATION_ERROR: &str = "GENERATION_ERROR";

/// Failure talking to, or interpreting, the upstream provider.
///
/// `Display` is the upstream's own message where one exists so it can be
/// passed through to callers verbatim.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status from the provider.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("malformed upstream payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid upstream configuration: {0}")]
    Config(String),

    /// Error reported in-band while streaming.
    #[error("{0}")]
    Stream(String),
}

/// A single violated field in an inbound payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    /// Path to the field, starting at `body`.
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(loc: &[&str], msg: impl Into<String>, kind: &str) -> Self {
        Self {
            loc: std::iter::once("body")
                .chain(loc.iter().copied())
                .map(str::to_string)
                .collect(),
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

/// Errors surfaced at the HTTP boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Inbound payload failed schema checks. No upstream call was made.
    #[error("request validation failed ({} field(s))", .0.len())]
    Validation(Vec<FieldError>),

    /// Upstream call failed.
    #[error("generation failed: {0}")]
    Generation(#[from] UpstreamError),
}

#[derive(Serialize)]
struct ValidationBody {
    detail: Vec<FieldError>,
}

#[derive(Serialize)]
struct GenerationBody {
    detail: GenerationDetail,
}

#[derive(Serialize)]
struct GenerationDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ValidationBody { detail }),
            )
                .into_response(),
            ApiError::Generation(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GenerationBody {
                    detail: GenerationDetail {
                        code: GENERATION_ERROR,
                        message: err.to_string(),
                    },
                }),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_loc_is_rooted_at_body() {
        let err = FieldError::new(&["messages", "0", "role"], "bad role", "enum");
        assert_eq!(err.loc, vec!["body", "messages", "0", "role"]);
    }

    #[test]
    fn test_status_codes() {
        let validation = ApiError::Validation(vec![]).into_response();
        assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let generation = ApiError::from(UpstreamError::Stream("boom".into())).into_response();
        assert_eq!(generation.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_message_passes_through() {
        let err = UpstreamError::Api {
            status: 401,
            message: "Incorrect API key provided".into(),
        };
        assert_eq!(err.to_string(), "Incorrect API key provided");
    }
}
