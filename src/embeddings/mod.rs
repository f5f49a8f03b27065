// Embeddings module
// Turns text into vectors through a remote provider

pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::EmbeddingClient;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    /// Provider reachable but answered with an error status
    #[error("Embedding provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("Embedding transport error: {0}")]
    Transport(String),
    #[error("Unusable embedding response: {0}")]
    InvalidResponse(String),
}

/// Source of query and document embeddings.
///
/// An empty vector means no embedding is available (for example, no
/// credential is configured). Callers treat it as text-only mode rather
/// than as a failure.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Model name reported in logs and responses
    fn model(&self) -> &str;
}
