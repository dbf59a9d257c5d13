//! Turn selection and answer folding.
//!
//! A question is the content of the last user message in the transcript.
//! Transcripts without a real question produce a fixed notice instead of a
//! remote call. Streamed replies are folded into one [`AnswerBuffer`] and the
//! caller sees the whole answer-so-far after every text part, so rendering
//! can simply replace the last message.

use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::models::{ChatMessage, Role};
use crate::provider::{ChunkStream, ProviderError};

/// Marker that starts every upload acknowledgement.
pub const UPLOAD_MARKER: &str = "📦 Uploaded:";

/// Shown when there is nothing to answer yet.
pub const START_NOTICE: &str = "Please enter a message to start the conversation.";

/// Shown when the latest user message is an upload acknowledgement.
pub const UPLOAD_FOLLOWUP_NOTICE: &str =
    "What would you like to know about the code in these files?";

/// Answer snapshots for one turn. Each item is the complete answer so far.
pub type AnswerStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// What a transcript asks of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnInput<'a> {
    /// Forward this prompt to the model.
    Question(&'a str),
    /// Reply locally with this notice; no remote call.
    Notice(&'static str),
}

/// Whether `content` is an upload acknowledgement rather than a question.
pub fn is_upload_notice(content: &str) -> bool {
    content.contains(UPLOAD_MARKER)
}

/// Picks the prompt for the next turn from the transcript.
pub fn select_prompt(history: &[ChatMessage]) -> TurnInput<'_> {
    let Some(last_user) = history.iter().rev().find(|m| m.role == Role::User) else {
        return TurnInput::Notice(START_NOTICE);
    };
    if is_upload_notice(&last_user.content) {
        return TurnInput::Notice(UPLOAD_FOLLOWUP_NOTICE);
    }
    TurnInput::Question(&last_user.content)
}

/// Growing answer text for one in-flight question.
#[derive(Debug, Default, Clone)]
pub struct AnswerBuffer {
    text: String,
}

impl AnswerBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn snapshot(&self) -> String {
        self.text.clone()
    }
}

/// Folds a chunk stream into cumulative answer snapshots.
///
/// One snapshot is yielded per text-bearing part; parts without text are
/// ignored. An error ends the sequence after everything already yielded.
pub fn fold_chunks(
    mut chunks: ChunkStream,
) -> impl Stream<Item = Result<String, ProviderError>> + Send {
    async_stream::try_stream! {
        let mut answer = AnswerBuffer::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for text in chunk.texts() {
                answer.push(text);
                yield answer.snapshot();
            }
        }
    }
}

/// A stream that yields `notice` once.
pub fn notice_stream(notice: &'static str) -> AnswerStream {
    Box::pin(futures::stream::once(async move { Ok(notice.to_string()) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkPart};

    fn chunk_stream(items: Vec<Result<Chunk, ProviderError>>) -> ChunkStream {
        Box::pin(futures::stream::iter(items))
    }

    #[test]
    fn empty_history_asks_for_input() {
        assert_eq!(select_prompt(&[]), TurnInput::Notice(START_NOTICE));
    }

    #[test]
    fn history_without_user_message_asks_for_input() {
        let history = vec![ChatMessage::assistant("Welcome!")];
        assert_eq!(select_prompt(&history), TurnInput::Notice(START_NOTICE));
    }

    #[test]
    fn upload_acknowledgement_is_not_a_question() {
        let history = vec![ChatMessage::user(format!("{} lib.zip", UPLOAD_MARKER))];
        assert_eq!(
            select_prompt(&history),
            TurnInput::Notice(UPLOAD_FOLLOWUP_NOTICE)
        );
    }

    #[test]
    fn last_user_message_is_the_question() {
        let history = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("answer"),
            ChatMessage::user("second"),
            ChatMessage::assistant("partial"),
        ];
        assert_eq!(select_prompt(&history), TurnInput::Question("second"));
    }

    #[tokio::test]
    async fn snapshots_grow_by_prefix_extension() {
        let chunks = chunk_stream(vec![
            Ok(Chunk::from_texts(["Hel"])),
            Ok(Chunk::from_texts(["lo"])),
            Ok(Chunk::from_texts([" world"])),
        ]);
        let snapshots: Vec<String> = fold_chunks(chunks)
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(snapshots, vec!["Hel", "Hello", "Hello world"]);
        for pair in snapshots.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test]
    async fn multi_part_chunks_yield_per_part_and_skip_non_text() {
        let chunks = chunk_stream(vec![Ok(Chunk {
            parts: vec![
                ChunkPart {
                    text: Some("a".into()),
                },
                ChunkPart { text: None },
                ChunkPart {
                    text: Some("b".into()),
                },
            ],
        })]);
        let snapshots: Vec<String> = fold_chunks(chunks)
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(snapshots, vec!["a", "ab"]);
    }

    #[tokio::test]
    async fn error_follows_already_yielded_snapshots() {
        let chunks = chunk_stream(vec![
            Ok(Chunk::from_texts(["par"])),
            Err(ProviderError::Stream("connection reset".into())),
            Ok(Chunk::from_texts(["never"])),
        ]);
        let items: Vec<Result<String, ProviderError>> = fold_chunks(chunks).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "par");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn notice_stream_yields_once() {
        let items: Vec<String> = notice_stream(START_NOTICE)
            .map(|s| s.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![START_NOTICE.to_string()]);
    }
}
