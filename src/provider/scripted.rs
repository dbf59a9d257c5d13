//! In-process provider with queued replies and a recorded event log.
//!
//! Replies are consumed in FIFO order across all contexts, one per streamed
//! prompt. With nothing queued the prompt is echoed back word by word, which
//! makes the provider usable offline (`provider = "echo"`).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{boxed_stream, ChunkStream, ConversationContext, ModelProvider, ProviderError};
use crate::models::{Chunk, ContentPart};

/// Something the provider observed, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    ContextCreated { context: String },
    Seeded { context: String, parts: Vec<ContentPart> },
    Prompt { context: String, prompt: String },
}

enum Reply {
    Chunks(Vec<Chunk>),
    FailAfter(Vec<Chunk>, String),
    Reject(String),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    events: Vec<ProviderEvent>,
    contexts: usize,
}

/// Deterministic provider for tests and offline use.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply streamed as one chunk per text.
    pub fn push_reply<I, S>(&self, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = texts
            .into_iter()
            .map(|t| Chunk::from_texts([t]))
            .collect();
        self.push_chunks(chunks);
    }

    /// Queues a reply made of the given chunks verbatim.
    pub fn push_chunks(&self, chunks: Vec<Chunk>) {
        self.lock().replies.push_back(Reply::Chunks(chunks));
    }

    /// Queues a reply that streams `texts` and then fails with `message`.
    pub fn push_failure_after<I, S>(&self, texts: I, message: impl Into<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = texts
            .into_iter()
            .map(|t| Chunk::from_texts([t]))
            .collect();
        self.lock()
            .replies
            .push_back(Reply::FailAfter(chunks, message.into()));
    }

    /// Queues a refusal to open the stream at all.
    pub fn push_rejection(&self, message: impl Into<String>) {
        self.lock()
            .replies
            .push_back(Reply::Reject(message.into()));
    }

    pub fn events(&self) -> Vec<ProviderEvent> {
        self.lock().events.clone()
    }

    pub fn contexts_created(&self) -> usize {
        self.lock().contexts
    }

    /// Seeding messages received, across all contexts.
    pub fn seeds(&self) -> Vec<(String, Vec<ContentPart>)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ProviderEvent::Seeded { context, parts } => Some((context.clone(), parts.clone())),
                _ => None,
            })
            .collect()
    }

    /// Prompts forwarded, across all contexts.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ProviderEvent::Prompt { context, prompt } => {
                    Some((context.clone(), prompt.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo"
    }

    async fn create_context(&self) -> Result<Box<dyn ConversationContext>, ProviderError> {
        let mut script = self.lock();
        script.contexts += 1;
        let id = format!("scripted-{}", script.contexts);
        script.events.push(ProviderEvent::ContextCreated {
            context: id.clone(),
        });
        Ok(Box::new(ScriptedContext {
            id,
            provider: self.clone(),
        }))
    }
}

struct ScriptedContext {
    id: String,
    provider: ScriptedProvider,
}

#[async_trait]
impl ConversationContext for ScriptedContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&mut self, parts: Vec<ContentPart>) -> Result<(), ProviderError> {
        self.provider.lock().events.push(ProviderEvent::Seeded {
            context: self.id.clone(),
            parts,
        });
        Ok(())
    }

    async fn send_streaming(&mut self, prompt: &str) -> Result<ChunkStream, ProviderError> {
        let reply = {
            let mut script = self.provider.lock();
            script.events.push(ProviderEvent::Prompt {
                context: self.id.clone(),
                prompt: prompt.to_string(),
            });
            script.replies.pop_front()
        };

        let (chunks, failure) = match reply {
            Some(Reply::Chunks(chunks)) => (chunks, None),
            Some(Reply::FailAfter(chunks, message)) => (chunks, Some(message)),
            Some(Reply::Reject(message)) => return Err(ProviderError::Stream(message)),
            None => (echo_chunks(prompt), None),
        };

        let items = chunks
            .into_iter()
            .map(Ok)
            .chain(failure.map(|m| Err(ProviderError::Stream(m))));
        Ok(boxed_stream(futures::stream::iter(items)))
    }
}

fn echo_chunks(prompt: &str) -> Vec<Chunk> {
    prompt
        .split_inclusive(' ')
        .map(|word| Chunk::from_texts([word]))
        .collect()
}
