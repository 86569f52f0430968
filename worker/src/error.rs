//! The worker's error taxonomy: one variant per failure category, so call
//! sites can match on category rather than message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Missing file, malformed JSON, schema violation, unresolved
    /// placeholder. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// RPC network failure or KV connection loss. Retried at the
    /// affected layer; the consumer loop reconnects KV and resumes.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// Per-transaction receipt fetch failed. Counted and retried via
    /// queue re-insertion up to the configured cap.
    #[error("fetch failure for tx {hash}: {source}")]
    FetchFailure {
        hash: String,
        #[source]
        source: anyhow::Error,
    },

    /// Per-hook processing failure. Logged and swallowed; does not stop
    /// other hooks and does not trigger requeue.
    #[error("hook '{hook}' failed for tx {hash}: {source}")]
    HookFailure {
        hook: String,
        hash: String,
        #[source]
        source: anyhow::Error,
    },

    /// Per-log ABI decoding failure. Logged and skipped.
    #[error("failed to decode log: {0}")]
    DecodeFailure(#[source] anyhow::Error),
}
