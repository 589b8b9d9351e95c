//! The connector capability interface.
//!
//! Every source (directory tree, live messaging workspace, exported
//! archive) implements [`Connector`]; the batch runner in [`crate::batch`]
//! depends only on this trait. Connectors are pull-driven: the runner
//! requests one document at a time, and all source work (file reads,
//! network calls) happens inline inside `next_document`.

use anyhow::Result;
use async_trait::async_trait;

use crate::checkpoint::CheckpointStore;
use crate::models::{Document, DocumentSource};

/// A data source that yields normalized documents and tracks its own
/// resumption state.
///
/// # Lifecycle
///
/// 1. `load_state` is called once, before the first document is pulled.
///    A missing checkpoint is not an error; the connector starts empty.
/// 2. `next_document` is called repeatedly until it returns `Ok(None)`.
/// 3. `save_state` is called after each full batch has been yielded to
///    the caller, and once more at end of run. It must persist all
///    progress corresponding to documents produced so far, never
///    progress for documents not yet handed out.
#[async_trait]
pub trait Connector: Send {
    /// Origin tag stamped on documents from this connector.
    fn source(&self) -> DocumentSource;

    /// Load prior progress from the store, or start from an empty state.
    async fn load_state(&mut self, store: &dyn CheckpointStore) -> Result<()>;

    /// Persist progress for every document produced so far.
    async fn save_state(&mut self, store: &dyn CheckpointStore) -> Result<()>;

    /// Produce the next document, or `Ok(None)` when the source is
    /// exhausted for this run.
    async fn next_document(&mut self) -> Result<Option<Document>>;
}
