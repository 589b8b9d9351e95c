//! # Ingest Harness
//!
//! An incremental document-ingestion connector framework.
//!
//! Connectors pull content from external sources (a local plain-text
//! directory tree, a live messaging workspace API, or an exported
//! archive) and emit a uniform stream of normalized [`models::Document`]s
//! for downstream indexing, tracking just enough durable state to resume
//! without re-processing previously seen content and without exceeding
//! per-run batch limits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────┐
//! │         Connectors          │
//! │  directory / messaging /    │
//! │          export             │
//! └────────────┬────────────────┘
//!              ▼ documents
//! ┌─────────────────────────────┐    ┌───────────────────┐
//! │         BatchedRun          │───▶│  CheckpointStore  │
//! │  bounded batches, max-run   │    │  (SQLite / mem)   │
//! │  cap, boundary persistence  │    └───────────────────┘
//! └────────────┬────────────────┘
//!              ▼ batches
//!        indexing pipeline
//! ```
//!
//! The caller drives a [`batch::BatchedRun`] by awaiting `next_batch`
//! until `None`; all connector work (file reads, API calls) happens
//! inline in that pull. Checkpoint progress for a batch becomes durable
//! only after the batch has been handed out, so a crash mid-run costs at
//! most one re-processed batch on the next run.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed connector failure modes |
//! | [`checkpoint`] | Durable key→value state stores |
//! | [`db`] | SQLite connection setup |
//! | [`batch`] | Batch-bounded, checkpointed iteration |
//! | [`traits`] | The `Connector` capability interface |
//! | [`messaging`] | Messaging API client and helpers |
//! | [`connector_fs`] | Directory connector |
//! | [`connector_messaging`] | Live messaging connector |
//! | [`connector_export`] | Exported-archive connector |
//! | [`sync`] | Connector dispatch from config |

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod connector_export;
pub mod connector_fs;
pub mod connector_messaging;
pub mod db;
pub mod error;
pub mod messaging;
pub mod models;
pub mod sync;
pub mod traits;
