//! Schema-constrained structured generation.
//!
//! Three layers:
//! - `schema`: a small JSON-schema subset (builders + structural validator)
//! - `provider`: the raw model capability (`AiProvider`) and its HTTP
//!   implementation
//! - `gateway`: concurrency limiting, retries with exponential backoff,
//!   and schema enforcement on top of any provider

pub mod gateway;
pub mod provider;
pub mod schema;

use thiserror::Error;

pub use gateway::AiGateway;
pub use provider::{AiProvider, GenerateRequest, HttpProvider};

#[derive(Debug, Error)]
pub enum AiError {
    /// Retryable provider failure (network, rate limit, non-OK finish).
    #[error("transient AI error: {0}")]
    Transient(String),

    /// Response failed structural validation after all permitted attempts.
    #[error("schema violation: {0}")]
    Schema(String),

    /// The provider refused to generate.
    #[error("generation blocked by provider: {0}")]
    Blocked(String),

    #[error("fatal AI error: {0}")]
    Fatal(String),
}

impl AiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
