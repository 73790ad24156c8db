use thiserror::Error;

/// Errors surfaced by the duplicate-detection pipeline.
///
/// Per-item failures (a single image's decode or download) are never
/// represented here — they are recovered locally and skipped.
/// These variants are for failures that abort a whole fingerprinting run.
#[derive(Debug, Error)]
pub enum MnemosyneError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no usable media in submission")]
    NoMedia,
    #[error("media inspection tool failed: {0}")]
    MediaTool(String),
    #[error("deep check cancelled")]
    Cancelled,
}

/// Errors surfaced by the dynamic/static planner.
#[derive(Debug, Error)]
pub enum ChronosError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid grid configuration: {0}")]
    InvalidGrid(String),
    #[error("post {0} is not pending approval")]
    NotPending(i64),
}

/// Errors from the persistent store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("post {0} not found")]
    PostNotFound(i64),
    #[error("malformed row: {0}")]
    Malformed(String),
    #[error("sqlite connection mutex poisoned")]
    Poisoned,
}
