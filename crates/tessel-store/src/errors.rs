//! Store failures.

use thiserror::Error;

/// A store operation that could not complete.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A statement against the database failed.
    #[error("store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// No pooled connection could be handed out.
    #[error("store connection unavailable: {0}")]
    Unavailable(#[from] r2d2::Error),

    /// Bringing the schema up to date failed at `stage` of step `version`.
    #[error("schema step v{version} failed while {stage}: {source}")]
    Schema {
        /// Step being applied; 0 for the bookkeeping table itself.
        version: u32,
        /// What the runner was doing.
        stage: &'static str,
        /// Underlying database error.
        #[source]
        source: rusqlite::Error,
    },
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
