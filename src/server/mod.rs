//! HTTP server.
//!
//! - [`api`]: Router, shared state and route handlers
//! - [`schemas`]: Request bodies and validation
//! - [`streaming`]: SSE relay for streamed generations

pub mod api;
pub mod schemas;
pub mod streaming;
