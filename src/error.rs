// ABOUTME: Error taxonomy shared by the store, dispatcher, and coordinator.
// ABOUTME: Storage failures surface to the user, NotFound is an invariant violation, Disposed means torn down.

use thiserror::Error;

use crate::store::RecordId;

/// Result alias for sleeptrack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a user intent and the session store.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing SQLite engine reported an error.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] rusqlite::Error),

    /// The storage directory could not be created or accessed.
    #[error("storage location unavailable: {0}")]
    StorageLocation(#[from] std::io::Error),

    /// An update targeted a record that does not exist.
    #[error("no session with id {0}")]
    NotFound(RecordId),

    /// The operation was requested after the coordinator or dispatcher was torn down.
    #[error("operation requested after teardown")]
    Disposed,

    /// A new session was requested while another one is still open.
    #[error("session {0} is still open")]
    SessionAlreadyOpen(RecordId),

    /// Quality ratings must fall within 0..=5.
    #[error("invalid quality rating {0}")]
    InvalidQuality(i32),

    /// The record exists but cannot take a rating right now.
    #[error("session {id} cannot be rated: {reason}")]
    NotRateable { id: RecordId, reason: &'static str },
}

impl Error {
    /// Whether this error came from the backing storage and should be shown to the user.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::StorageFailure(_) | Error::StorageLocation(_))
    }
}
