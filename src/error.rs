//! Typed errors for the failure modes callers are expected to distinguish.
//!
//! Most fallible paths return `anyhow::Result`; the variants here are the
//! cases a caller may want to match on (via `Error::downcast_ref`) rather
//! than just report. Everything else (I/O failures, malformed config,
//! bad JSON) stays as plain `anyhow` context chains.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A requested channel name does not exist in the workspace.
    /// Configuration error: fatal, never retried.
    #[error("channel '{name}' not found in workspace; available channels: {available:?}")]
    ChannelNotFound {
        name: String,
        available: Vec<String>,
    },

    /// A live connector was driven before credentials were supplied.
    #[error("{connector} connector has no credentials loaded")]
    MissingCredential { connector: &'static str },

    /// The source API rejected or failed a call. Distinct from
    /// programming errors; may be transient (e.g. a permission scope
    /// failure on private-channel listing, which is downgraded to a
    /// public-only retry rather than surfaced).
    #[error("source API call '{call}' failed: {message}")]
    SourceApi { call: String, message: String },
}
