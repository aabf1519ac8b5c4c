use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use tandem_core::prelude::*;

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

#[derive(Debug, Default)]
struct StoreData {
    collections: HashMap<String, CollectionData>,
    next_id: u64,
}

/// An in-memory document store.
///
/// This store is useful for testing and development purposes. It is not
/// recommended for production use, as nothing is persisted.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    data: Arc<Mutex<StoreData>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryDocumentStore");
        Self::default()
    }

    /// Number of documents in `collection` matching `filter`.
    pub async fn count(&self, collection: &str, filter: &Document) -> usize {
        let data = self.data.lock().await;
        data.collections
            .get(collection)
            .map(|c| c.documents.iter().filter(|d| matches(d, filter)).count())
            .unwrap_or(0)
    }

    /// Snapshot of every document in `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let data = self.data.lock().await;
        data.collections
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the indexes defined on `collection`.
    pub async fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        let data = self.data.lock().await;
        data.collections
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| document.get(field).unwrap_or(&Value::Null) == expected)
}

fn index_values(document: &Document, index: &IndexSpec) -> Vec<Value> {
    index
        .fields
        .iter()
        .map(|(field, _)| document.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Finds a unique index `candidate` would violate, ignoring the document at
/// position `skip` (the document being updated).
fn violated_index(
    collection: &CollectionData,
    candidate: &Document,
    skip: Option<usize>,
) -> Option<String> {
    for index in collection.indexes.iter().filter(|i| i.unique) {
        let values = index_values(candidate, index);
        let clash = collection
            .documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .any(|(_, existing)| index_values(existing, index) == values);
        if clash {
            let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
            return Some(format!("{} ({})", index.name, rendered.join(", ")));
        }
    }
    None
}

fn apply_fields(document: &mut Document, fields: &Document) {
    for (field, value) in fields {
        document.insert(field.clone(), value.clone());
    }
}

impl StoreData {
    fn update(
        &mut self,
        collection: &str,
        filter: &Document,
        fields: &Document,
        limit: Option<usize>,
    ) -> Result<u64, StoreError> {
        let Some(data) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let positions: Vec<usize> = data
            .documents
            .iter()
            .enumerate()
            .filter(|(_, d)| matches(d, filter))
            .map(|(position, _)| position)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        for position in &positions {
            let mut updated = data.documents[*position].clone();
            apply_fields(&mut updated, fields);
            if let Some(key) = violated_index(data, &updated, Some(*position)) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    key,
                });
            }
            data.documents[*position] = updated;
        }
        Ok(positions.len() as u64)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        let data = self.data.lock().await;
        let mut names: Vec<String> = data.collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        data.collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        let data = data.collections.entry(collection.to_string()).or_default();
        if data.indexes.iter().any(|i| i.name == index.name) {
            return Ok(());
        }
        log::debug!("Creating index {} on {}", index.name, collection);
        data.indexes.push(index);
        Ok(())
    }

    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .collections
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|d| matches(d, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        let data = self.data.lock().await;
        Ok(data.collections.get(collection).and_then(|c| {
            c.documents
                .iter()
                .find(|d| matches(d, &filter))
                .cloned()
        }))
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        data.next_id += 1;
        let id = data.next_id;
        document
            .entry("_id")
            .or_insert_with(|| Value::String(format!("{id:024x}")));

        let target = data.collections.entry(collection.to_string()).or_default();
        if let Some(key) = violated_index(target, &document, None) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }
        target.documents.push(document);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        fields: Document,
    ) -> Result<u64, StoreError> {
        let mut data = self.data.lock().await;
        data.update(collection, &filter, &fields, Some(1))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        fields: Document,
    ) -> Result<u64, StoreError> {
        let mut data = self.data.lock().await;
        data.update(collection, &filter, &fields, None)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        let mut data = self.data.lock().await;
        let Some(data) = data.collections.get_mut(collection) else {
            return Ok(0);
        };
        match data.documents.iter().position(|d| matches(d, &filter)) {
            Some(position) => {
                data.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
