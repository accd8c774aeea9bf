//! Error types for the search index core.

use thiserror::Error;

/// Failures surfaced by the search index.
///
/// Indexing-path callers log and swallow these so a failed index write never
/// breaks the host workflow that triggered it; the search boundary converts
/// them into a single generic user-facing message.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The index table or its full-text indexes could not be created.
    #[error("failed to create the search index schema: {0}")]
    Schema(#[source] sqlx::Error),

    /// A read or write against the index table failed.
    #[error("search index storage error: {0}")]
    Storage(#[source] sqlx::Error),

    /// A ranked-retrieval query could not be executed.
    #[error("search query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// The database URL does not name a supported storage engine.
    #[error("unsupported database engine in URL: {0}")]
    UnsupportedEngine(String),
}
