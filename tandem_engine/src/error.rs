use tandem_core::prelude::*;
use tandem_core::RecordError;

/// Errors that can occur while discovering or running migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The document store rejected an operation.
    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    /// A stored execution record could not be encoded or decoded.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// The migrations tree could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A migration failed to execute. The run stopped at this migration.
    #[error("Migration {key} failed: {source}")]
    MigrationFailed {
        /// The migration that failed.
        key: MigrationKey,
        /// The error raised by the migration.
        #[source]
        source: BoxError,
    },

    /// Another process holds the run lock.
    #[error("Migration run lock is held by {holder} since {acquired_at}")]
    LockHeld {
        /// Holder id recorded in the lock.
        holder: String,
        /// When the holder acquired the lock, as stored.
        acquired_at: String,
    },
}
