//! Execution records persisted in the `migrations` collection of the
//! document store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Document;

/// Name of the document-store collection holding migration records.
pub const MIGRATIONS_COLLECTION: &str = "migrations";

/// The database a migration targets.
///
/// The stored literals are the historical driver names and must not change,
/// existing records are matched on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseKind {
    /// The document store. Also holds the migration records.
    #[serde(rename = "mongodb")]
    Document,
    /// The columnar analytics store.
    #[serde(rename = "clickhouse")]
    Columnar,
}

impl DatabaseKind {
    /// The literal stored in the `type` field of a record.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Document => "mongodb",
            DatabaseKind::Columnar => "clickhouse",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a migration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationCategory {
    /// Initial setup of collections or tables.
    Init,
    /// Structural change (indexes, columns, tables).
    #[default]
    Schema,
    /// Data backfill or transformation.
    Data,
}

impl MigrationCategory {
    /// The literal stored in the `migration_type` field of a record.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationCategory::Init => "init",
            MigrationCategory::Schema => "schema",
            MigrationCategory::Data => "data",
        }
    }
}

/// Composite identity of a migration: owning module, date version and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigrationKey {
    /// Owning module name.
    pub module: String,
    /// Date version (`YYYYMMDD`).
    pub version: String,
    /// Migration name, unique within module and version.
    pub name: String,
}

impl MigrationKey {
    /// Creates a new key.
    pub fn new(
        module: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            version: version.into(),
            name: name.into(),
        }
    }

    /// Equality filter selecting the stored record for this key.
    pub fn filter(&self) -> Document {
        let mut filter = Map::new();
        filter.insert("module".into(), Value::String(self.module.clone()));
        filter.insert("version".into(), Value::String(self.version.clone()));
        filter.insert("name".into(), Value::String(self.name.clone()));
        filter
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.module, self.version, self.name)
    }
}

/// Errors converting records to and from documents.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The record could not be encoded or a stored document could not be decoded.
    #[error("Invalid migration record: {0}")]
    Serde(#[from] serde_json::Error),

    /// The record did not serialize to a JSON object.
    #[error("Migration record must serialize to an object")]
    NotAnObject,
}

/// Outcome of one migration execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Owning module name.
    pub module: String,
    /// Date version the migration was discovered under.
    pub version: String,
    /// Migration name.
    pub name: String,
    /// Target database.
    #[serde(rename = "type")]
    pub database_kind: DatabaseKind,
    /// What the migration changes.
    #[serde(rename = "migration_type", default)]
    pub category: MigrationCategory,
    /// Execution order within the version, lower runs first.
    #[serde(default = "default_order")]
    pub order: i64,
    /// When the attempt finished.
    pub executed_at: DateTime<Utc>,
    /// Wall-clock duration of the attempt.
    #[serde(default)]
    pub execution_time_ms: f64,
    /// Whether the attempt succeeded.
    #[serde(default = "default_success")]
    pub success: bool,
    /// Error text of a failed attempt.
    #[serde(default)]
    pub error: Option<String>,
    /// Human description of the migration.
    #[serde(default)]
    pub description: Option<String>,
    /// Content checksum at the time of execution.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_order() -> i64 {
    100
}

fn default_success() -> bool {
    true
}

impl MigrationRecord {
    /// The composite identity of this record.
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(&self.module, &self.version, &self.name)
    }

    /// Encodes the record as a document-store document.
    pub fn to_document(&self) -> Result<Document, RecordError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(RecordError::NotAnObject),
        }
    }

    /// Decodes a stored document. Unknown fields (such as a store-assigned id)
    /// are ignored.
    pub fn from_document(document: Document) -> Result<Self, RecordError> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

/// Optional equality filter over stored records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Only records of this module.
    pub module: Option<String>,
    /// Only records of this version.
    pub version: Option<String>,
    /// Only records targeting this database.
    pub database_kind: Option<DatabaseKind>,
    /// Only succeeded (`true`) or failed (`false`) records.
    pub success: Option<bool>,
}

impl RecordFilter {
    /// Converts the filter into a field-equality document.
    pub fn to_document(&self) -> Document {
        let mut filter = Map::new();
        if let Some(module) = &self.module {
            filter.insert("module".into(), Value::String(module.clone()));
        }
        if let Some(version) = &self.version {
            filter.insert("version".into(), Value::String(version.clone()));
        }
        if let Some(kind) = self.database_kind {
            filter.insert("type".into(), Value::String(kind.as_str().to_string()));
        }
        if let Some(success) = self.success {
            filter.insert("success".into(), Value::Bool(success));
        }
        filter
    }
}
