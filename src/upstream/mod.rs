//! Upstream Responses API adapter.
//!
//! - [`types`]: Wire shapes and text extraction
//! - [`sse`]: Incremental SSE decoding of streamed generations
//! - [`client`]: The [`client::Generator`] seam and its HTTP implementation

pub mod client;
pub mod sse;
pub mod types;

pub use client::{EventStream, Generator, ResponsesClient};
pub use types::{GenerationRequest, GenerationResult, UpstreamEvent};
