//! The document-store interface consumed by the engine and by document
//! migrations.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::BoxError;

/// A stored document.
pub type Document = Map<String, Value>;

/// Sort direction of an index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    /// Ascending (`1`).
    Ascending,
    /// Descending (`-1`).
    Descending,
}

/// Definition of a collection index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Indexed fields in order.
    pub fields: Vec<(String, IndexDirection)>,
    /// Whether the index enforces uniqueness over its fields.
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique ascending index over `fields`.
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .iter()
                .map(|field| (field.to_string(), IndexDirection::Ascending))
                .collect(),
            unique: false,
        }
    }

    /// Marks the index as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Errors returned by a document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write violated a unique index.
    #[error("Duplicate key in collection {collection}: {key}")]
    DuplicateKey {
        /// Collection the write targeted.
        collection: String,
        /// Rendered values of the violated index.
        key: String,
    },

    /// The referenced collection does not exist.
    #[error("Collection not found: {0}")]
    NotFound(String),

    /// Any driver level failure.
    #[error("Document store error: {0}")]
    Backend(#[source] BoxError),
}

/// An async document-store handle.
///
/// Filters are field-equality documents: a document matches when every
/// filter field is present with an equal value. Updates use `$set`
/// semantics: listed fields are overwritten, others are kept.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of the existing collections.
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError>;

    /// Creates a collection. Creating an existing collection is not an error.
    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Creates an index. Re-creating an index with the same name is a no-op.
    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError>;

    /// All documents matching `filter`.
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError>;

    /// The first document matching `filter`.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError>;

    /// Inserts a document.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), StoreError>;

    /// Sets `fields` on the first matching document. Returns the matched count.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        fields: Document,
    ) -> Result<u64, StoreError>;

    /// Sets `fields` on every matching document. Returns the matched count.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        fields: Document,
    ) -> Result<u64, StoreError>;

    /// Deletes the first matching document. Returns the deleted count.
    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, StoreError>;
}
