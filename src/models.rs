//! Core data models used throughout the ingestion pipeline.
//!
//! These types represent the normalized documents emitted to the indexing
//! pipeline, the source-native messaging records they are built from, and
//! the per-source checkpoint state that makes runs resumable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Origin tag carried on every emitted [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    /// Local directory of plain-text files.
    Directory,
    /// Messaging workspace (live API or exported archive).
    Messaging,
}

/// One linked span of text within a [`Document`].
///
/// `link` is a permalink to the source item and may be empty. Section
/// order within a document is meaningful: downstream consumers concatenate
/// sections in order for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub link: String,
    pub text: String,
}

/// Normalized ingestible unit handed to the indexing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Globally unique within a source (relative file path, or
    /// `{channel_id}__{root_ts}` for messaging threads).
    pub id: String,
    pub sections: Vec<Section>,
    pub source: DocumentSource,
    /// Human-readable label: channel name or file path.
    pub semantic_identifier: String,
    /// Opaque to this crate; passed through to the indexing pipeline.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Total text length across all sections. Live messaging documents
    /// with zero total length are suppressed before batching.
    pub fn total_text_len(&self) -> usize {
        self.sections.iter().map(|s| s.text.len()).sum()
    }
}

/// A channel in the messaging workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
}

/// A single message from the live history or thread-replies API.
///
/// `ts` is the message's cursor token and doubles as its unique id within
/// a channel. A non-empty `thread_ts` marks a thread reply (or thread
/// root); `subtype` marks system events subject to filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

/// One page of channel history, with the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

/// Per-channel sync position persisted between runs.
///
/// `oldest`/`latest` are source-native cursor tokens bounding what has
/// already been seen. `initial` starts `true` (backward sweep through the
/// channel's full history) and flips to `false` permanently once a sweep
/// completes, after which runs poll forward from `latest` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub name: String,
    #[serde(default)]
    pub oldest: Option<String>,
    #[serde(default)]
    pub latest: Option<String>,
    pub initial: bool,
}

impl ChannelState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            oldest: None,
            latest: None,
            initial: true,
        }
    }
}

/// Full messaging checkpoint value: channel id → sync position.
pub type WorkspaceState = HashMap<String, ChannelState>;

/// Directory checkpoint value: absolute file path → processed marker.
///
/// Grows monotonically and is never pruned; a path present as a key is
/// skipped on every future run even if its content changed.
pub type ProcessedFiles = HashMap<String, bool>;
