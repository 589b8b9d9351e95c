//! End-to-end tests for the exported-archive connector: manifest-driven
//! loading, thread merging, event filtering, and the channel allowlist.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ingest_harness::batch::BatchedRun;
use ingest_harness::checkpoint::MemoryCheckpointStore;
use ingest_harness::config::ExportConnectorConfig;
use ingest_harness::connector_export::ExportConnector;
use ingest_harness::error::ConnectorError;
use ingest_harness::models::{Document, DocumentSource};
use serde_json::json;
use tempfile::TempDir;

fn write_export(root: &Path, channels: serde_json::Value, files: &[(&str, serde_json::Value)]) {
    fs::write(root.join("channels.json"), channels.to_string()).unwrap();
    for (rel, events) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, events.to_string()).unwrap();
    }
}

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn connector(root: &Path, channels: Option<&[&str]>) -> ExportConnector {
    init_logs();
    ExportConnector::new(&ExportConnectorConfig {
        path: root.to_path_buf(),
        workspace: "acme.example.com".to_string(),
        channels: channels.map(|names| names.iter().map(|n| n.to_string()).collect()),
    })
}

async fn run_to_completion(connector: ExportConnector) -> Vec<Document> {
    BatchedRun::new(
        Box::new(connector),
        Arc::new(MemoryCheckpointStore::new()),
        16,
        None,
    )
    .collect_batches()
    .await
    .unwrap()
    .into_iter()
    .flatten()
    .collect()
}

#[tokio::test]
async fn replies_merge_into_the_thread_root_document() {
    let tmp = TempDir::new().unwrap();
    write_export(
        tmp.path(),
        json!([{"id": "C1", "name": "general"}]),
        &[(
            "general/2023-01-01.json",
            json!([
                {"type": "message", "ts": "100.1", "thread_ts": "100.1", "text": "root"},
                {"type": "message", "ts": "100.2", "thread_ts": "100.1", "text": "reply"}
            ]),
        )],
    );

    let docs = run_to_completion(connector(tmp.path(), None)).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "100.1");
    assert_eq!(docs[0].source, DocumentSource::Messaging);
    assert_eq!(docs[0].semantic_identifier, "general");
    let texts: Vec<&str> = docs[0].sections.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["root", "reply"]);
    assert_eq!(
        docs[0].sections[1].link,
        "https://acme.example.com/archives/C1/p1002"
    );
}

#[tokio::test]
async fn unthreaded_messages_become_standalone_documents() {
    let tmp = TempDir::new().unwrap();
    write_export(
        tmp.path(),
        json!([{"id": "C1", "name": "general"}]),
        &[(
            "general/2023-01-01.json",
            json!([
                {"type": "message", "ts": "1.0", "text": "first"},
                {"type": "message", "ts": "2.0", "text": "second"}
            ]),
        )],
    );

    let docs = run_to_completion(connector(tmp.path(), None)).await;
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].id, "1.0");
    assert_eq!(docs[1].id, "2.0");
}

#[tokio::test]
async fn join_events_and_non_messages_are_skipped() {
    let tmp = TempDir::new().unwrap();
    write_export(
        tmp.path(),
        json!([{"id": "C1", "name": "general"}]),
        &[(
            "general/2023-01-01.json",
            json!([
                {"type": "message", "subtype": "channel_join", "ts": "1.0", "text": "joined"},
                {"type": "reaction_added", "ts": "2.0"},
                {"type": "message", "ts": "3.0", "text": "kept"}
            ]),
        )],
    );

    let docs = run_to_completion(connector(tmp.path(), None)).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].sections[0].text, "kept");
}

#[tokio::test]
async fn day_files_are_processed_in_sorted_order() {
    let tmp = TempDir::new().unwrap();
    write_export(
        tmp.path(),
        json!([{"id": "C1", "name": "general"}]),
        &[
            (
                "general/2023-01-02.json",
                json!([
                    {"type": "message", "ts": "200.2", "thread_ts": "100.5", "text": "late reply"}
                ]),
            ),
            (
                "general/2023-01-01.json",
                json!([
                    {"type": "message", "ts": "100.5", "thread_ts": "100.5", "text": "root"}
                ]),
            ),
        ],
    );

    // The reply lands in the next day's file but still merges into the
    // root created from the earlier file.
    let docs = run_to_completion(connector(tmp.path(), None)).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].sections.len(), 2);
    assert_eq!(docs[0].sections[0].text, "root");
    assert_eq!(docs[0].sections[1].text, "late reply");
}

#[tokio::test]
async fn allowlist_limits_loaded_channels() {
    let tmp = TempDir::new().unwrap();
    write_export(
        tmp.path(),
        json!([
            {"id": "C1", "name": "general"},
            {"id": "C2", "name": "eng"}
        ]),
        &[
            (
                "general/2023-01-01.json",
                json!([{"type": "message", "ts": "1.0", "text": "general msg"}]),
            ),
            (
                "eng/2023-01-01.json",
                json!([{"type": "message", "ts": "2.0", "text": "eng msg"}]),
            ),
        ],
    );

    let docs = run_to_completion(connector(tmp.path(), Some(&["eng"]))).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].semantic_identifier, "eng");
}

#[tokio::test]
async fn unknown_allowlist_name_fails_before_any_document() {
    let tmp = TempDir::new().unwrap();
    write_export(
        tmp.path(),
        json!([{"id": "C1", "name": "general"}]),
        &[(
            "general/2023-01-01.json",
            json!([{"type": "message", "ts": "1.0", "text": "msg"}]),
        )],
    );

    let mut run = BatchedRun::new(
        Box::new(connector(tmp.path(), Some(&["nope"]))),
        Arc::new(MemoryCheckpointStore::new()),
        16,
        None,
    );
    let err = run.next_batch().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConnectorError>(),
        Some(ConnectorError::ChannelNotFound { .. })
    ));
}

#[tokio::test]
async fn missing_manifest_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let mut run = BatchedRun::new(
        Box::new(connector(tmp.path(), None)),
        Arc::new(MemoryCheckpointStore::new()),
        16,
        None,
    );
    let err = run.next_batch().await.unwrap_err();
    assert!(err.to_string().contains("channels.json"));
}
