//! HTTP client for the upstream Responses API.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::UpstreamError;
use crate::upstream::sse::decode_events;
use crate::upstream::types::{
    ErrorEnvelope, GenerationRequest, GenerationResult, ResponseObject, ResponsesBody,
    UpstreamEvent,
};

/// Identity sent as `User-Agent` and reported by `/versions`.
pub const CLIENT_IDENTITY: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Incremental events from a streaming generation.
pub type EventStream = BoxStream<'static, Result<UpstreamEvent, UpstreamError>>;

/// A source of generations.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run a generation to completion and extract its text.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, UpstreamError>;

    /// Start a streaming generation.
    ///
    /// Dropping the returned stream releases the upstream connection.
    async fn generate_stream(&self, request: GenerationRequest) -> Result<EventStream, UpstreamError>;
}

/// [`Generator`] backed by the hosted Responses API.
#[derive(Clone)]
pub struct ResponsesClient {
    http: Client,
    endpoint: String,
    request_timeout: std::time::Duration,
}

impl ResponsesClient {
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.upstream.api_key))
            .map_err(|_| UpstreamError::Config("API key contains invalid header characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        // No whole-request timeout here: it would cut long streams short. The
        // read timeout bounds silence between chunks instead.
        let http = Client::builder()
            .user_agent(CLIENT_IDENTITY)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/responses", config.upstream.base_url.trim_end_matches('/')),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Map non-success statuses to [`UpstreamError::Api`].
    async fn check_status(response: Response) -> Result<Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or_else(|| format!("upstream returned {status}: {}", body.trim()));

        warn!(status = status.as_u16(), error = %message, "Upstream rejected request");
        Err(UpstreamError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Generator for ResponsesClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, UpstreamError> {
        debug!(model = request.model, endpoint = self.endpoint, "Calling upstream");

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .json(&ResponsesBody {
                request: &request,
                stream: false,
            })
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let bytes = response.bytes().await?;
        let parsed: ResponseObject = serde_json::from_slice(&bytes)?;

        Ok(GenerationResult {
            model: request.model,
            output: parsed.extract_text(),
        })
    }

    async fn generate_stream(&self, request: GenerationRequest) -> Result<EventStream, UpstreamError> {
        debug!(model = request.model, endpoint = self.endpoint, "Opening upstream stream");

        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(&ResponsesBody {
                request: &request,
                stream: true,
            })
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        Ok(decode_events(response.bytes_stream()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(base_url: &str) -> Config {
        let mut config = Config::default();
        config.upstream.api_key = "sk-test".into();
        config.upstream.base_url = base_url.into();
        config
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = ResponsesClient::new(&config_with("https://api.openai.com/v1/")).unwrap();
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/responses");
    }

    #[test]
    fn test_identity_names_crate() {
        assert!(CLIENT_IDENTITY.starts_with("prompt-gateway/"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to accept connections.
        let client = ResponsesClient::new(&config_with("http://127.0.0.1:9/v1")).unwrap();
        let err = client
            .generate(GenerationRequest {
                model: "gpt-4o-mini".into(),
                instructions: None,
                input: "hi".into(),
                temperature: 0.3,
                max_output_tokens: 16,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)));
    }
}
