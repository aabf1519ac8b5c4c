//! Migration scripts: one versioned change against one database.
//!
//! A script implements either [`DocumentMigration`] or [`ColumnarMigration`];
//! the trait fixes the database the script targets. Scripts do not declare
//! their own version, it is assigned by the directory they are discovered in.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use tandem_core::prelude::*;
//! use tandem_engine::{DocumentMigration, MigrationInfo};
//!
//! pub struct CreateUserCollection;
//!
//! impl MigrationInfo for CreateUserCollection {
//!     fn name(&self) -> &'static str { "create_user_collection" }
//!     fn order(&self) -> i64 { 10 }
//! }
//!
//! #[async_trait]
//! impl DocumentMigration for CreateUserCollection {
//!     async fn run(&self, db: &dyn DocumentStore) -> Result<(), BoxError> {
//!         db.create_collection("user").await?;
//!         db.create_index("user", IndexSpec::new("user_email_unique", &["email"]).unique())
//!             .await?;
//!         Ok(())
//!     }
//! }
//!
//! tandem_engine::register_document_migration!(CreateUserCollection);
//! ```

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;
use sha2::{Digest, Sha256};

use tandem_core::prelude::*;

/// Metadata shared by every migration script.
pub trait MigrationInfo: Send + Sync {
    /// Name, unique within the owning module and version.
    fn name(&self) -> &'static str;

    /// Human description.
    fn description(&self) -> &'static str {
        ""
    }

    /// What the migration changes.
    fn category(&self) -> MigrationCategory {
        MigrationCategory::Schema
    }

    /// Execution order within the version. Lower runs first.
    fn order(&self) -> i64 {
        100
    }

    /// Body text included in the checksum. Override to return the SQL or
    /// other content whose edits should be detectable between runs.
    fn source(&self) -> Option<&'static str> {
        None
    }

    /// Checksum recorded with every execution. Advisory only: a changed
    /// checksum of an already executed migration is logged, never enforced.
    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name().as_bytes());
        hasher.update([0]);
        hasher.update(self.description().as_bytes());
        hasher.update([0]);
        hasher.update(self.category().as_str().as_bytes());
        hasher.update(self.order().to_le_bytes());
        if let Some(source) = self.source() {
            hasher.update(source.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A migration against the document store.
#[async_trait]
pub trait DocumentMigration: MigrationInfo {
    /// Performs the change.
    async fn run(&self, db: &dyn DocumentStore) -> Result<(), BoxError>;

    /// Runs the migration and builds its execution record.
    async fn execute(
        &self,
        db: &dyn DocumentStore,
        module: &str,
        version: &str,
    ) -> Result<MigrationRecord, ExecutionFailure> {
        timed(self, DatabaseKind::Document, module, version, self.run(db)).await
    }
}

/// A migration against the columnar store.
///
/// The client handed to [`ColumnarMigration::run`] rewrites DDL for the
/// configured cluster and retries transient connection failures, so scripts
/// are written as plain single-node SQL.
#[async_trait]
pub trait ColumnarMigration: MigrationInfo {
    /// Performs the change.
    async fn run(&self, db: &dyn ColumnarClient) -> Result<(), BoxError>;

    /// Runs the migration and builds its execution record.
    async fn execute(
        &self,
        db: &dyn ColumnarClient,
        module: &str,
        version: &str,
    ) -> Result<MigrationRecord, ExecutionFailure> {
        timed(self, DatabaseKind::Columnar, module, version, self.run(db)).await
    }
}

/// A failed execution: the error together with the failure record that
/// should be persisted for it.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ExecutionFailure {
    /// Record with `success = false` and the error text.
    pub record: MigrationRecord,
    /// The error raised by the script.
    #[source]
    pub source: BoxError,
}

async fn timed<I, F>(
    info: &I,
    kind: DatabaseKind,
    module: &str,
    version: &str,
    run: F,
) -> Result<MigrationRecord, ExecutionFailure>
where
    I: MigrationInfo + ?Sized,
    F: Future<Output = Result<(), BoxError>>,
{
    let started = Instant::now();
    let outcome = run.await;
    let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let description = info.description();
    let mut record = MigrationRecord {
        module: module.to_string(),
        version: version.to_string(),
        name: info.name().to_string(),
        database_kind: kind,
        category: info.category(),
        order: info.order(),
        executed_at: Utc::now(),
        execution_time_ms,
        success: true,
        error: None,
        description: (!description.is_empty()).then(|| description.to_string()),
        checksum: Some(info.checksum()),
        metadata: Map::new(),
    };

    match outcome {
        Ok(()) => Ok(record),
        Err(source) => {
            log::error!("Migration '{}' failed: {}", info.name(), source);
            record.success = false;
            record.error = Some(source.to_string());
            Err(ExecutionFailure { record, source })
        }
    }
}

/// A migration script of either kind.
pub enum MigrationScript {
    /// Targets the document store.
    Document(Box<dyn DocumentMigration>),
    /// Targets the columnar store.
    Columnar(Box<dyn ColumnarMigration>),
}

impl MigrationScript {
    /// Wraps a document migration.
    pub fn document(migration: impl DocumentMigration + 'static) -> Self {
        Self::Document(Box::new(migration))
    }

    /// Wraps a columnar migration.
    pub fn columnar(migration: impl ColumnarMigration + 'static) -> Self {
        Self::Columnar(Box::new(migration))
    }

    /// The database this script targets.
    pub fn database_kind(&self) -> DatabaseKind {
        match self {
            Self::Document(_) => DatabaseKind::Document,
            Self::Columnar(_) => DatabaseKind::Columnar,
        }
    }

    /// The script metadata.
    pub fn info(&self) -> &dyn MigrationInfo {
        self
    }

    /// Shorthand for `info().name()`.
    pub fn name(&self) -> &'static str {
        MigrationInfo::name(self)
    }

    /// Shorthand for `info().order()`.
    pub fn order(&self) -> i64 {
        MigrationInfo::order(self)
    }
}

macro_rules! delegate {
    ($self:ident, $method:ident) => {
        match $self {
            MigrationScript::Document(script) => script.$method(),
            MigrationScript::Columnar(script) => script.$method(),
        }
    };
}

impl MigrationInfo for MigrationScript {
    fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    fn description(&self) -> &'static str {
        delegate!(self, description)
    }

    fn category(&self) -> MigrationCategory {
        delegate!(self, category)
    }

    fn order(&self) -> i64 {
        delegate!(self, order)
    }

    fn source(&self) -> Option<&'static str> {
        delegate!(self, source)
    }

    fn checksum(&self) -> String {
        delegate!(self, checksum)
    }
}

impl std::fmt::Debug for MigrationScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationScript")
            .field("name", &self.name())
            .field("database_kind", &self.database_kind())
            .field("order", &self.order())
            .finish()
    }
}

/// A script registered under its owning module and date version.
#[derive(Debug)]
pub struct DiscoveredMigration {
    /// Owning module.
    pub module: String,
    /// Date version (`YYYYMMDD`), from the directory the script was found in.
    pub version: String,
    /// The script.
    pub script: MigrationScript,
}

impl DiscoveredMigration {
    /// The composite identity of this migration.
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(&self.module, &self.version, self.script.name())
    }
}
