//! # Tandem core
//!
//! Data model and collaborator interfaces shared by the tandem migration
//! engine. The engine runs versioned migrations against two structurally
//! different databases: a document store (where the execution records live)
//! and a columnar analytics store. Both are consumed only through the traits
//! defined here, so any driver can be plugged in.

#![deny(missing_docs)]

pub mod columnar;
pub mod document;
pub mod record;

pub use columnar::{ColumnarClient, ColumnarError, CommandOutput, Parameters};
pub use document::{Document, DocumentStore, IndexDirection, IndexSpec, StoreError};
pub use record::{
    DatabaseKind, MIGRATIONS_COLLECTION, MigrationCategory, MigrationKey, MigrationRecord,
    RecordError, RecordFilter,
};

/// Boxed error returned by migration bodies and driver backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub mod prelude {
    //! The prelude module for the `tandem_core` crate.
    pub use super::{
        BoxError, ColumnarClient, ColumnarError, CommandOutput, DatabaseKind, Document,
        DocumentStore, IndexDirection, IndexSpec, MigrationCategory, MigrationKey,
        MigrationRecord, Parameters, RecordFilter, StoreError,
    };
}
