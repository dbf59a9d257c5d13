//! Application state and the three entry points used by presentation layers.
//!
//! [`ChatSession`] owns the artifact store and the session registry behind a
//! single async mutex. Deriving the session key and binding (creating and
//! seeding, if needed) its context happen as one step under that lock, so an
//! upload cannot slip in between the two. Each context additionally sits
//! behind its own lock for the length of a streamed answer, which serializes
//! questions aimed at the same conversation.
//!
//! # Usage
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use repochat::chat::ChatSession;
//! use repochat::models::ChatMessage;
//! use repochat::provider::ScriptedProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session = ChatSession::new(Arc::new(ScriptedProvider::new()));
//! let mut history = vec![ChatMessage::user(session.upload_batch(&["src.zip"]).await)];
//! history.push(ChatMessage::user("What does main.py do?"));
//!
//! let mut answers = session.ask(&history);
//! while let Some(snapshot) = answers.next().await {
//!     println!("{}", snapshot?);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::extract::{self, DEFAULT_MAX_ENTRY_BYTES};
use crate::models::ChatMessage;
use crate::provider::{create_provider, ModelProvider, ProviderError};
use crate::session::{SessionRegistry, SharedContext};
use crate::store::ArtifactStore;
use crate::stream::{fold_chunks, notice_stream, select_prompt, AnswerStream, TurnInput, UPLOAD_MARKER};

/// Returned by [`ChatSession::reset`] for display.
pub const WELCOME_MESSAGE: &str =
    "Session reset. Upload code files or ask a question to get started.";

#[derive(Default)]
struct SessionState {
    store: ArtifactStore,
    registry: SessionRegistry,
}

/// Outcome of one successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Display name the batch is stored under.
    pub batch_id: String,
    /// Extracted filenames, sorted.
    pub files: Vec<String>,
}

impl UploadReport {
    /// Human-readable acknowledgement, starting with the upload marker.
    pub fn summary(&self) -> String {
        if self.files.is_empty() {
            return format!(
                "{} {}, but no text files were found.",
                UPLOAD_MARKER, self.batch_id
            );
        }
        let listing = self
            .files
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{} {}\nExtracted {} text files:\n{}",
            UPLOAD_MARKER,
            self.batch_id,
            self.files.len(),
            listing
        )
    }
}

/// Long-lived owner of uploaded artifacts and model conversations.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct ChatSession {
    provider: Arc<dyn ModelProvider>,
    state: Arc<Mutex<SessionState>>,
    max_entry_bytes: u64,
}

impl ChatSession {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(SessionState::default())),
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }

    /// Builds a session with the provider and limits named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.model)?;
        Ok(Self::new(provider).with_max_entry_bytes(config.upload.max_entry_bytes))
    }

    pub fn with_max_entry_bytes(mut self, max_entry_bytes: u64) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    pub fn provider(&self) -> &dyn ModelProvider {
        self.provider.as_ref()
    }

    /// Extracts one upload and records it under its basename.
    ///
    /// An upload without any text file is reported but not recorded. Failing
    /// to open the file or archive is returned as an error; previously stored
    /// batches are unaffected.
    pub async fn upload(&self, path: &Path) -> Result<UploadReport> {
        let batch_id = extract::batch_id_for(path);
        let is_archive = extract::is_archive_path(path);
        let max_entry_bytes = self.max_entry_bytes;

        let source = path.to_path_buf();
        let id = batch_id.clone();
        let batch = tokio::task::spawn_blocking(move || {
            extract::extract(&id, &source, is_archive, max_entry_bytes)
        })
        .await
        .context("extraction task failed")??;

        let files: Vec<String> = batch.keys().cloned().collect();
        if !batch.is_empty() {
            self.state.lock().await.store.record(batch_id.clone(), batch);
        }
        tracing::info!(batch = %batch_id, files = files.len(), "recorded upload");

        Ok(UploadReport { batch_id, files })
    }

    /// Uploads every path and returns one acknowledgement covering all of them.
    ///
    /// A path that cannot be opened is reported inline; the others proceed.
    pub async fn upload_batch<P: AsRef<Path>>(&self, paths: &[P]) -> String {
        let mut paragraphs = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            match self.upload(path).await {
                Ok(report) => paragraphs.push(report.summary()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "upload failed");
                    paragraphs.push(format!(
                        "{} {}, but it could not be read: {:#}",
                        UPLOAD_MARKER,
                        extract::batch_id_for(path),
                        e
                    ));
                }
            }
        }
        paragraphs.join("\n\n")
    }

    /// Answers the last user message of `history`.
    ///
    /// Yields the full answer-so-far after every streamed text part. When the
    /// transcript holds no real question a single notice is yielded and no
    /// remote call is made. Remote failures end the stream with an error
    /// after any snapshots already yielded.
    pub fn ask(&self, history: &[ChatMessage]) -> AnswerStream {
        let prompt = match select_prompt(history) {
            TurnInput::Notice(notice) => return notice_stream(notice),
            TurnInput::Question(prompt) => prompt.to_string(),
        };

        let session = self.clone();
        boxed_answers(async_stream::try_stream! {
            let context = session.bind_context().await?;
            let mut conversation = context.lock().await;
            tracing::debug!(context = conversation.id(), "forwarding prompt");
            let chunks = conversation.send_streaming(&prompt).await?;

            let mut snapshots = Box::pin(fold_chunks(chunks));
            while let Some(snapshot) = snapshots.next().await {
                yield snapshot?;
            }
        })
    }

    /// Clears every uploaded batch and every conversation.
    pub async fn reset(&self) -> String {
        *self.state.lock().await = SessionState::default();
        tracing::info!("session state reset");
        WELCOME_MESSAGE.to_string()
    }

    /// Session key for the store's current contents.
    pub async fn current_key(&self) -> String {
        self.state.lock().await.store.current_key()
    }

    /// Copy of the artifact store.
    pub async fn store_snapshot(&self) -> ArtifactStore {
        self.state.lock().await.store.clone()
    }

    /// Number of live conversations.
    pub async fn context_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    async fn bind_context(&self) -> Result<SharedContext, ProviderError> {
        let mut state = self.state.lock().await;
        let key = state.store.current_key();
        let SessionState { store, registry } = &mut *state;
        registry
            .get_or_create(&key, store, self.provider.as_ref())
            .await
    }
}

fn boxed_answers<S>(stream: S) -> AnswerStream
where
    S: futures::Stream<Item = Result<String>> + Send + 'static,
{
    Box::pin(stream)
}
