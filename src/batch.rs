//! Batch-bounded, checkpointed iteration over a connector.
//!
//! [`BatchedRun`] groups a connector's document stream into batches of at
//! most `batch_size`, enforces a per-run `max_batches` cap, and persists
//! checkpoint progress at batch boundaries. Persistence is deliberately
//! deferred to the *next* `next_batch` call (or the end-of-run flush), so
//! progress is never durable before its documents have been handed to the
//! caller. A crash between yield and persist means the in-flight batch is
//! re-processed on the next run: at-least-once, never silent loss.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::models::Document;
use crate::traits::Connector;

pub struct BatchedRun {
    connector: Box<dyn Connector>,
    store: Arc<dyn CheckpointStore>,
    batch_size: usize,
    max_batches: Option<usize>,
    batches_emitted: usize,
    loaded: bool,
    pending_save: bool,
    exhausted: bool,
}

impl BatchedRun {
    pub fn new(
        connector: Box<dyn Connector>,
        store: Arc<dyn CheckpointStore>,
        batch_size: usize,
        max_batches: Option<usize>,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            connector,
            store,
            batch_size,
            max_batches,
            batches_emitted: 0,
            loaded: false,
            pending_save: false,
            exhausted: false,
        }
    }

    /// Pull the next batch of documents.
    ///
    /// Returns `Ok(None)` once the source is exhausted or the max-batches
    /// cap is reached; the final call also flushes checkpoint state, so
    /// callers must drain to `None` for progress to become durable.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        if !self.loaded {
            self.connector.load_state(self.store.as_ref()).await?;
            self.loaded = true;
        }

        // Commit progress for the batch yielded by the previous call.
        if self.pending_save {
            self.connector.save_state(self.store.as_ref()).await?;
            self.pending_save = false;
        }

        if self.exhausted {
            return Ok(None);
        }

        if let Some(max) = self.max_batches {
            if self.batches_emitted >= max {
                info!(max_batches = max, "reached max batches, stopping run");
                self.exhausted = true;
                return Ok(None);
            }
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.connector.next_document().await? {
                Some(doc) => batch.push(doc),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            // End of run with nothing left to flush downstream; progress
            // accumulated since the last boundary (e.g. channel mode
            // transitions with zero new messages) still gets persisted.
            self.connector.save_state(self.store.as_ref()).await?;
            return Ok(None);
        }

        self.batches_emitted += 1;
        self.pending_save = true;
        info!(
            source = ?self.connector.source(),
            batch = self.batches_emitted,
            documents = batch.len(),
            "yielding batch"
        );
        Ok(Some(batch))
    }

    /// Drain the run to completion, collecting every batch.
    pub async fn collect_batches(mut self) -> Result<Vec<Vec<Document>>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::models::{DocumentSource, Section};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            sections: vec![Section {
                link: String::new(),
                text: format!("text for {}", id),
            }],
            source: DocumentSource::Directory,
            semantic_identifier: id.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Yields a fixed number of documents and records how many had been
    /// produced at each save, so tests can check save ordering.
    struct ScriptedConnector {
        total: usize,
        produced: usize,
        saves: Arc<AtomicUsize>,
        saved_progress: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(total: usize) -> Self {
            Self {
                total,
                produced: 0,
                saves: Arc::new(AtomicUsize::new(0)),
                saved_progress: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn source(&self) -> DocumentSource {
            DocumentSource::Directory
        }

        async fn load_state(&mut self, _store: &dyn CheckpointStore) -> Result<()> {
            Ok(())
        }

        async fn save_state(&mut self, store: &dyn CheckpointStore) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.saved_progress.store(self.produced, Ordering::SeqCst);
            store.store("scripted", &json!(self.produced)).await
        }

        async fn next_document(&mut self) -> Result<Option<Document>> {
            if self.produced >= self.total {
                return Ok(None);
            }
            self.produced += 1;
            Ok(Some(doc(&format!("doc-{}", self.produced))))
        }
    }

    #[tokio::test]
    async fn groups_into_bounded_batches_with_final_partial_flush() {
        let connector = ScriptedConnector::new(7);
        let mut run = BatchedRun::new(Box::new(connector), Arc::new(MemoryCheckpointStore::new()), 3, None);

        let sizes: Vec<usize> = {
            let mut out = Vec::new();
            while let Some(batch) = run.next_batch().await.unwrap() {
                out.push(batch.len());
            }
            out
        };
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn save_happens_only_after_batch_is_yielded() {
        let connector = ScriptedConnector::new(4);
        let saves = connector.saves.clone();
        let mut run = BatchedRun::new(Box::new(connector), Arc::new(MemoryCheckpointStore::new()), 2, None);

        let first = run.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        // First batch handed out, but nothing persisted yet.
        assert_eq!(saves.load(Ordering::SeqCst), 0);

        let second = run.next_batch().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
        // Entering the second pull committed the first batch.
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        // Final pull commits the second batch, then flushes end-of-run
        // state after discovering the source is exhausted.
        assert!(run.next_batch().await.unwrap().is_none());
        assert_eq!(saves.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn max_batches_cap_leaves_remaining_items_unconsumed() {
        let connector = ScriptedConnector::new(10);
        let saved_progress = connector.saved_progress.clone();
        let run = BatchedRun::new(Box::new(connector), Arc::new(MemoryCheckpointStore::new()), 2, Some(2));

        let batches = run.collect_batches().await.unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 2));
        // Only the four yielded documents were ever marked persisted.
        assert_eq!(saved_progress.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_source_yields_no_batches_and_still_saves_state() {
        let connector = ScriptedConnector::new(0);
        let saves = connector.saves.clone();
        let mut run = BatchedRun::new(Box::new(connector), Arc::new(MemoryCheckpointStore::new()), 3, None);

        assert!(run.next_batch().await.unwrap().is_none());
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        // Subsequent pulls stay exhausted without saving again.
        assert!(run.next_batch().await.unwrap().is_none());
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }
}
