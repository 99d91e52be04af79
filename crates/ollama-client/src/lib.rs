//! Blocking driver for a local Ollama inference server.
//!
//! The pipeline generator and the healing engine both talk to the model
//! through this crate. It owns the HTTP details: the health probe that must
//! pass before the first completion, model pulls, per-call timeouts, and the
//! bounded retry on transient I/O failures.
//!
//! ```text
//! OllamaClient::new(ClientConfig)
//!     │
//!     ├── health_check()      GET  /api/tags
//!     ├── ensure_model(name)  GET  /api/tags, POST /api/pull
//!     └── generate(request)   POST /api/generate   (retried on transient errors)
//! ```
//!
//! Responses frequently wrap the useful payload in Markdown code fences;
//! [`extract_code_block`] strips them.

pub mod client;
pub mod error;
pub mod extract;
pub mod types;

pub use client::{ClientConfig, OllamaClient};
pub use error::OllamaError;
pub use extract::extract_code_block;
pub use types::{GenerateOptions, GenerateRequest, GenerateResponse, ModelTag, TagsResponse};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, OllamaError>;
