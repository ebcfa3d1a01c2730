//! prompt-gateway: a small HTTP front for a hosted LLM.
//!
//! Exposes one-shot prompts, multi-turn chat and SSE streaming, and
//! translates each into a call against the provider's Responses API.

pub mod config;
pub mod error;
pub mod server;
pub mod transcript;
pub mod upstream;
