//! # Tandem engine
//!
//! Versioned migrations for a document store and a columnar store, run by a
//! single [`MigrationManager`].
//!
//! Migrations are grouped by module and by date version (`vYYYYMMDD`
//! directories). Each execution attempt is recorded in the document store,
//! which makes runs idempotent and lets a failed migration be retried on the
//! next run. Columnar DDL is rewritten for a replicated cluster when one is
//! configured, and transient connection failures are retried with backoff.

#![deny(missing_docs)]

pub mod client;
pub mod cluster;
pub mod config;
pub mod discovery;
mod error;
pub mod lock;
pub mod manager;
pub mod registry;
pub mod scaffold;
pub mod script;

pub use client::{ClusterAwareClient, retry_delay};
pub use cluster::{ClusterRewriter, split_statements};
pub use config::{ClusterConfig, InstanceMode, MigrationConfig, RetryConfig};
pub use error::MigrationError;
pub use manager::{ExecutionState, MigrationManager};
pub use registry::{MigrationRegistration, MigrationRegistry, registered_migrations};
pub use script::{
    ColumnarMigration, DiscoveredMigration, DocumentMigration, ExecutionFailure, MigrationInfo,
    MigrationScript,
};

#[doc(hidden)]
pub use inventory;

pub mod prelude {
    //! The prelude module for the `tandem_engine` crate.
    pub use super::{
        ClusterConfig, ColumnarMigration, DocumentMigration, InstanceMode, MigrationConfig,
        MigrationError, MigrationInfo, MigrationManager, MigrationRegistry, MigrationScript,
        RetryConfig,
    };
    pub use tandem_core::prelude::*;
}
