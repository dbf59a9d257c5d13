//! Session registry and context seeding.
//!
//! Each distinct session key owns one remote conversation for the lifetime
//! of the process (or until reset). The first time a key is seen, a fresh
//! context is created and every artifact in the store is submitted to it as
//! one seeding message, before any question is forwarded.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::extract::extension_of;
use crate::models::ContentPart;
use crate::provider::{ConversationContext, ModelProvider, ProviderError};
use crate::store::ArtifactStore;

/// Note appended after the file parts of a seeding message.
pub const SEED_NOTE: &str =
    "I've uploaded these code files for you to analyze. I'll ask questions about them next.";

/// A conversation shared between the registry and in-flight questions.
pub type SharedContext = Arc<Mutex<Box<dyn ConversationContext>>>;

/// Content-type label sent alongside a file of the given name.
pub fn content_type_for(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("py") => "text/x-python",
        Some("js" | "jsx") => "text/javascript",
        Some("ts" | "tsx") => "text/typescript",
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        _ => "text/plain",
    }
}

/// Builds the seeding message for everything currently in `store`.
///
/// Returns no parts for an empty store.
pub fn seed_parts(store: &ArtifactStore) -> Vec<ContentPart> {
    let mut parts: Vec<ContentPart> = store
        .artifacts()
        .map(|artifact| ContentPart::File {
            mime_type: content_type_for(&artifact.filename).to_string(),
            data: format!("File: {}\n\n{}", artifact.filename, artifact.content),
        })
        .collect();
    if !parts.is_empty() {
        parts.push(ContentPart::Text(SEED_NOTE.to_string()));
    }
    parts
}

/// Session key → live conversation.
#[derive(Default)]
pub struct SessionRegistry {
    contexts: HashMap<String, SharedContext>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the context bound to `key`, creating and seeding it on first use.
    ///
    /// Seeding uses the store's contents at creation time. A context whose
    /// seeding fails is not registered, so the next question retries from
    /// scratch.
    pub async fn get_or_create(
        &mut self,
        key: &str,
        store: &ArtifactStore,
        provider: &dyn ModelProvider,
    ) -> Result<SharedContext, ProviderError> {
        if let Some(existing) = self.contexts.get(key) {
            return Ok(existing.clone());
        }

        let mut context = provider.create_context().await?;
        tracing::info!(
            key,
            context = context.id(),
            model = provider.model(),
            "created conversation context"
        );

        let parts = seed_parts(store);
        if !parts.is_empty() {
            tracing::info!(context = context.id(), parts = parts.len(), "seeding context");
            context.send(parts).await?;
        }

        let shared: SharedContext = Arc::new(Mutex::new(context));
        self.contexts.insert(key.to_string(), shared.clone());
        Ok(shared)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.contexts.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drops every context.
    pub fn reset(&mut self) {
        self.contexts.clear();
    }
}
