//! Core data models used throughout repochat.
//!
//! These types represent the uploaded artifacts, the chat transcript handed
//! in by the presentation layer, and the message/chunk shapes exchanged with
//! a remote model provider.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Artifacts produced by one upload, keyed by logical filename.
///
/// A `BTreeMap` keeps iteration (and therefore seeding order) deterministic.
pub type ArtifactBatch = BTreeMap<String, String>;

/// One extracted text file with its decoded content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Archive-relative path, or the basename of a plain file.
    pub filename: String,
    /// Decoded text; invalid UTF-8 has been replaced with U+FFFD.
    pub content: String,
    /// Identifier of the upload batch this artifact came from.
    pub source_batch: String,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single entry of the conversation transcript owned by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One part of an outbound message to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    /// Plain instruction or question text.
    Text(String),
    /// A file body labelled with a content type.
    File { mime_type: String, data: String },
}

/// One increment of a streamed model response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub parts: Vec<ChunkPart>,
}

/// A part inside a streamed chunk. Only parts carrying text are folded into answers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPart {
    pub text: Option<String>,
}

impl Chunk {
    /// Builds a chunk whose parts all carry text.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: texts
                .into_iter()
                .map(|t| ChunkPart {
                    text: Some(t.into()),
                })
                .collect(),
        }
    }

    /// Iterates the text-bearing parts in arrival order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| p.text.as_deref())
    }
}
