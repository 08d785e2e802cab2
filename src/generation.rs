//! Text-generation collaborator contract.
//!
//! The orchestration core never talks to a language-model provider directly.
//! Unit behaviors receive a [`TextGenerator`] and treat it as an opaque
//! asynchronous call: one prompt in, one block of text (or a stream of
//! chunks) out. Retry policy, provider selection, and transport concerns all
//! live behind this trait, outside the core.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use miette::Diagnostic;
use thiserror::Error;

/// Stream of generated text chunks, terminated by the provider.
pub type ChunkStream = BoxStream<'static, Result<String, GenerationError>>;

/// Capability interface for the external text-generation service.
///
/// Implementors perform the actual provider call. The core calls
/// [`generate`](Self::generate) for whole responses and
/// [`generate_stream`](Self::generate_stream) when incremental chunks should
/// be forwarded to observers; the default streaming implementation wraps the
/// whole response as a single chunk so non-streaming providers need only
/// implement `generate`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a complete block of text for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Generate text as a stream of chunks.
    async fn generate_stream(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        let text = self.generate(prompt).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// Errors surfaced by the text-generation collaborator.
///
/// The core performs no retries of its own; a `GenerationError` propagates to
/// the failing unit's event stream and from there to the scheduler.
#[derive(Debug, Error, Diagnostic)]
pub enum GenerationError {
    /// The upstream provider rejected or failed the request.
    #[error("generation provider error ({provider}): {message}")]
    #[diagnostic(
        code(taskweave::generation::provider),
        help("Check provider availability and credentials; retries are the collaborator's responsibility.")
    )]
    Provider { provider: String, message: String },

    /// A streaming response ended before the provider signalled completion.
    #[error("generation stream interrupted: {0}")]
    #[diagnostic(code(taskweave::generation::stream_interrupted))]
    StreamInterrupted(String),
}

impl GenerationError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
