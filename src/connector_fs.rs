//! Directory connector: recursive walk over a plain-text tree.
//!
//! Walks the configured root, emitting one [`Document`] per `.txt` file.
//! Files with any other extension are skipped with a warning. A file's
//! first line may start with the `#METADATA=` sentinel followed by a JSON
//! object; that line is stripped from the body and its `link` key becomes
//! the section link.
//!
//! Checkpointing is by absolute path presence only: once a path is in the
//! processed map it is skipped on every later run, even if its content
//! changed since. The map grows monotonically and is never pruned.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checkpoint::{CheckpointStore, DIRECTORY_STATE_KEY};
use crate::config::DirectoryConnectorConfig;
use crate::models::{Document, DocumentSource, ProcessedFiles, Section};
use crate::traits::Connector;

const METADATA_SENTINEL: &str = "#METADATA=";
const RECOGNIZED_EXTENSION: &str = "txt";

pub struct DirectoryConnector {
    root: PathBuf,
    state: ProcessedFiles,
    walker: Option<walkdir::IntoIter>,
    /// Absolute paths of documents produced since the last state save.
    pending: Vec<String>,
}

impl DirectoryConnector {
    pub fn new(config: &DirectoryConnectorConfig) -> Self {
        Self {
            root: config.root.clone(),
            state: ProcessedFiles::new(),
            walker: None,
            pending: Vec::new(),
        }
    }
}

/// Split file content into (metadata, body). The sentinel line, when
/// present, is excluded from the body; all other lines keep their
/// original terminators.
fn split_metadata(raw: &str, path: &Path) -> Result<(serde_json::Map<String, Value>, String)> {
    let mut metadata = serde_json::Map::new();
    let mut body = String::with_capacity(raw.len());

    for (idx, line) in raw.split_inclusive('\n').enumerate() {
        if idx == 0 && line.starts_with(METADATA_SENTINEL) {
            let rest = line[METADATA_SENTINEL.len()..].trim();
            let parsed: Value = serde_json::from_str(rest).with_context(|| {
                format!("invalid metadata line in '{}'", path.display())
            })?;
            match parsed {
                Value::Object(map) => metadata = map,
                _ => bail!("metadata line in '{}' is not a JSON object", path.display()),
            }
        } else {
            body.push_str(line);
        }
    }

    Ok((metadata, body))
}

#[async_trait]
impl Connector for DirectoryConnector {
    fn source(&self) -> DocumentSource {
        DocumentSource::Directory
    }

    async fn load_state(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        self.state = match store.load(DIRECTORY_STATE_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .context("corrupt directory connector checkpoint")?,
            None => ProcessedFiles::new(),
        };
        debug!(known_files = self.state.len(), "loaded directory checkpoint");
        Ok(())
    }

    async fn save_state(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        for path in self.pending.drain(..) {
            self.state.insert(path, true);
        }
        let value = serde_json::to_value(&self.state)?;
        store.store(DIRECTORY_STATE_KEY, &value).await
    }

    async fn next_document(&mut self) -> Result<Option<Document>> {
        if self.walker.is_none() {
            if !self.root.exists() {
                bail!(
                    "directory connector root does not exist: {}",
                    self.root.display()
                );
            }
            info!(root = %self.root.display(), "walking directory tree");
            self.walker = Some(WalkDir::new(&self.root).sort_by_file_name().into_iter());
        }

        while let Some(entry) = self.walker.as_mut().and_then(|w| w.next()) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if extension != RECOGNIZED_EXTENSION {
                warn!(
                    path = %path.display(),
                    extension,
                    "skipping file with unrecognized extension"
                );
                continue;
            }

            let abs_path = path
                .canonicalize()
                .unwrap_or_else(|_| path.to_path_buf())
                .to_string_lossy()
                .to_string();
            if self.state.contains_key(&abs_path) {
                debug!(path = %abs_path, "already processed, skipping");
                continue;
            }

            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let (metadata, body) = split_metadata(&raw, path)?;
            let link = metadata
                .get("link")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            let rel_path = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();

            self.pending.push(abs_path);
            return Ok(Some(Document {
                id: rel_path.clone(),
                sections: vec![Section { link, text: body }],
                source: DocumentSource::Directory,
                semantic_identifier: rel_path,
                metadata,
            }));
        }

        Ok(None)
    }
}
