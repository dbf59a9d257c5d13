//! Remote model provider abstraction.
//!
//! A [`ModelProvider`] creates [`ConversationContext`]s: stateful handles to
//! one remote conversation. A context accepts a one-off synchronous message
//! ([`send`](ConversationContext::send), used for seeding) and streamed
//! prompts ([`send_streaming`](ConversationContext::send_streaming)) whose
//! replies arrive as a sequence of [`Chunk`]s.
//!
//! Implementations:
//! - **[`GeminiProvider`]**: Google Generative Language REST API with SSE streaming.
//! - **[`ScriptedProvider`]**: in-process provider with queued replies and an
//!   event log; echoes prompts when nothing is queued. Selected with
//!   `provider = "echo"`.
//!
//! # Retry Strategy
//!
//! The Gemini provider retries the synchronous `send` call:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Streaming requests are never retried; a failure mid-answer surfaces to the caller.

mod gemini;
mod scripted;

pub use gemini::GeminiProvider;
pub use scripted::{ProviderEvent, ScriptedProvider};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ModelConfig;
use crate::models::{Chunk, ContentPart};

/// Failure talking to the remote model. Fatal for the current turn only.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("response stream failed: {0}")]
    Stream(String),
}

/// Streamed reply to a prompt.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ProviderError>> + Send>>;

/// Factory for remote conversations bound to one model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier (e.g. `"gemini"`).
    fn name(&self) -> &str;
    /// Model identifier sent to the provider.
    fn model(&self) -> &str;
    /// Opens a new, empty conversation.
    async fn create_context(&self) -> Result<Box<dyn ConversationContext>, ProviderError>;
}

/// One stateful remote conversation. Turn history accumulates inside the context.
#[async_trait]
pub trait ConversationContext: Send {
    /// Identifier for logging.
    fn id(&self) -> &str;

    /// Sends a message and waits for the model's acknowledgement.
    async fn send(&mut self, parts: Vec<ContentPart>) -> Result<(), ProviderError>;

    /// Sends `prompt` and returns the streamed reply.
    async fn send_streaming(&mut self, prompt: &str) -> Result<ChunkStream, ProviderError>;
}

/// Creates the provider named by `config.provider`.
pub fn create_provider(config: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(config)?)),
        "echo" => Ok(Arc::new(ScriptedProvider::new())),
        other => anyhow::bail!("Unknown model provider: {}", other),
    }
}

fn boxed_stream<S>(stream: S) -> ChunkStream
where
    S: Stream<Item = Result<Chunk, ProviderError>> + Send + 'static,
{
    Box::pin(stream)
}
