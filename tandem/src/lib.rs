//! # Tandem
//!
//! Versioned migrations across a document store and a columnar store.
//!
//! ```rust,ignore
//! use tandem::prelude::*;
//!
//! let mut manager = MigrationManager::new(MigrationConfig::from_env(), MigrationRegistry::collected());
//! manager.discover_app_migrations()?;
//! manager.run_pending_migrations(&documents, Some(&columnar)).await?;
//! ```

#![deny(missing_docs)]

pub use tandem_engine::{register_columnar_migration, register_document_migration};

/// Migration engine: manager, discovery, cluster rewriting and retries.
pub mod engine {
    //! Re-exports the `tandem_engine` crate.
    pub use tandem_engine::*;
}

#[cfg(feature = "in-memory")]
/// In-memory document and columnar backends.
pub mod mem {
    //! Re-exports the `tandem_mem` crate.
    pub use tandem_mem::*;
}

pub mod prelude {
    //! The prelude module for the `tandem` crate.
    pub use tandem_engine::prelude::*;

    #[cfg(feature = "in-memory")]
    pub use super::mem::{InMemoryColumnarClient, InMemoryDocumentStore};
}
