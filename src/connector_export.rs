//! Exported-archive connector.
//!
//! Consumes a workspace export on disk: a `channels.json` manifest plus
//! one directory per channel holding JSON arrays of message events. The
//! whole export is the unit of work: there is no pagination, no
//! checkpointing, and no resumption; documents accumulate in memory and
//! are flushed once at the end of the run.
//!
//! Thread replies are merged into the document that started the thread:
//! each reply produces a new document value whose sections are the old
//! sections plus one appended section, preserving arrival order.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::config::ExportConnectorConfig;
use crate::messaging::{filter_channels, message_link};
use crate::models::{Channel, Document, DocumentSource, Section};
use crate::traits::Connector;

#[derive(Debug, Deserialize)]
struct ExportEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    text: String,
}

pub struct ExportConnector {
    export_path: PathBuf,
    workspace: String,
    channel_filter: Option<Vec<String>>,
    /// Built on first pull; the whole export must be read before anything
    /// can be emitted, since later events may append to earlier documents.
    queue: Option<VecDeque<Document>>,
}

impl ExportConnector {
    pub fn new(config: &ExportConnectorConfig) -> Self {
        Self {
            export_path: config.path.clone(),
            workspace: config.workspace.clone(),
            channel_filter: config.channels.clone(),
            queue: None,
        }
    }

    fn load_export(&self) -> Result<VecDeque<Document>> {
        let manifest_path = self.export_path.join("channels.json");
        let manifest = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("failed to read manifest '{}'", manifest_path.display()))?;
        let all_channels: Vec<Channel> =
            serde_json::from_str(&manifest).context("malformed channels.json manifest")?;
        let channels = filter_channels(&all_channels, self.channel_filter.as_deref())?;

        // Documents in arrival order, with an id index for thread merging.
        let mut docs: Vec<Document> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for channel in &channels {
            let channel_dir = self.export_path.join(&channel.name);
            let mut event_files: Vec<PathBuf> = std::fs::read_dir(&channel_dir)
                .with_context(|| {
                    format!("failed to list channel export '{}'", channel_dir.display())
                })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            event_files.sort();

            for file in &event_files {
                let raw = std::fs::read_to_string(file)
                    .with_context(|| format!("failed to read '{}'", file.display()))?;
                let events: Vec<ExportEvent> = serde_json::from_str(&raw)
                    .with_context(|| format!("malformed event array in '{}'", file.display()))?;
                debug!(file = %file.display(), events = events.len(), "processing export file");

                for event in events {
                    self.apply_event(channel, event, &mut docs, &mut by_id)?;
                }
            }
        }

        info!(documents = docs.len(), "loaded archive export");
        Ok(docs.into())
    }

    fn apply_event(
        &self,
        channel: &Channel,
        event: ExportEvent,
        docs: &mut Vec<Document>,
        by_id: &mut HashMap<String, usize>,
    ) -> Result<()> {
        if event.kind.as_deref() != Some("message")
            || event.subtype.as_deref() == Some("channel_join")
        {
            return Ok(());
        }

        let ts = event
            .ts
            .as_deref()
            .with_context(|| format!("message event without ts in channel '{}'", channel.name))?;
        let section = Section {
            link: message_link(&self.workspace, &channel.id, ts),
            text: event.text.clone(),
        };

        let root = event.thread_ts.as_deref().unwrap_or("");
        if let Some(&pos) = by_id.get(root) {
            // Document identity is immutable once created: appending means
            // replacing the stored value with one carrying an extra section.
            let existing = &docs[pos];
            let mut sections = existing.sections.clone();
            sections.push(section);
            docs[pos] = Document {
                id: existing.id.clone(),
                sections,
                source: existing.source,
                semantic_identifier: existing.semantic_identifier.clone(),
                metadata: existing.metadata.clone(),
            };
        } else {
            let doc = Document {
                id: ts.to_string(),
                sections: vec![section],
                source: DocumentSource::Messaging,
                semantic_identifier: channel.name.clone(),
                metadata: serde_json::Map::new(),
            };
            by_id.insert(doc.id.clone(), docs.len());
            docs.push(doc);
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for ExportConnector {
    fn source(&self) -> DocumentSource {
        DocumentSource::Messaging
    }

    // Exports are one-shot: nothing to resume, nothing to persist.
    async fn load_state(&mut self, _store: &dyn CheckpointStore) -> Result<()> {
        Ok(())
    }

    async fn save_state(&mut self, _store: &dyn CheckpointStore) -> Result<()> {
        Ok(())
    }

    async fn next_document(&mut self) -> Result<Option<Document>> {
        if self.queue.is_none() {
            self.queue = Some(self.load_export()?);
        }
        Ok(self.queue.as_mut().and_then(|q| q.pop_front()))
    }
}
