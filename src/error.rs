//! Error types shared by the storage layer and the presence components.

use thiserror::Error;

/// Failures raised by the SQLite-backed store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to callers of the registry, signal queue, message log and
/// code book.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("friend `{0}` not found")]
    NotFound(String),

    #[error("`{0}` already exists")]
    AlreadyExists(String),

    #[error("no free color left in group `{0}`")]
    PaletteExhausted(String),

    #[error("color allocation in group `{0}` kept conflicting, try again")]
    ColorConflict(String),

    #[error("signal queue for `{0}` is full")]
    QueueFull(String),

    #[error("a signal must carry at least one color")]
    EmptySignal,

    #[error("invalid time of day `{0}`, expected HH:MM")]
    InvalidTimeOfDay(String),

    /// The store failed. Details stay in the source chain and the log.
    #[error("operation failed")]
    StoreUnavailable(#[source] StorageError),
}

pub type PresenceResult<T> = Result<T, PresenceError>;

impl PresenceError {
    /// Log a storage failure for `operation` and hide it behind the generic
    /// `StoreUnavailable` kind.
    pub fn store(operation: &'static str) -> impl FnOnce(StorageError) -> PresenceError {
        move |err| {
            log::error!("{operation} failed: {err}");
            PresenceError::StoreUnavailable(err)
        }
    }
}
