//! Cross-process run lock for [`InstanceMode::Coordinated`](crate::InstanceMode).
//!
//! The lock is a single document in [`LOCKS_COLLECTION`], made exclusive by a
//! unique index on its name. A lock older than the configured TTL belongs to
//! a process that died mid-run and is taken over.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use tandem_core::prelude::*;

use crate::error::MigrationError;

/// Collection holding run locks.
pub const LOCKS_COLLECTION: &str = "migration_locks";

const RUN_LOCK_NAME: &str = "run_pending_migrations";

/// A held run lock. Release it with [`RunLock::release`].
#[derive(Debug)]
pub struct RunLock {
    holder: String,
}

impl RunLock {
    /// Acquires the run lock, taking over a lock older than `ttl`.
    ///
    /// Returns [`MigrationError::LockHeld`] when another holder owns a fresh
    /// lock.
    pub async fn acquire(doc: &dyn DocumentStore, ttl: Duration) -> Result<Self, MigrationError> {
        ensure_locks_collection(doc).await?;

        let holder = Uuid::new_v4().to_string();
        let now = Utc::now();

        match doc
            .insert_one(LOCKS_COLLECTION, lock_document(&holder, now))
            .await
        {
            Ok(()) => {
                info!("Acquired migration run lock as {}", holder);
                return Ok(Self { holder });
            }
            Err(StoreError::DuplicateKey { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let Some(current) = doc.find_one(LOCKS_COLLECTION, name_filter()).await? else {
            // Released between the insert and the read
            return match doc
                .insert_one(LOCKS_COLLECTION, lock_document(&holder, now))
                .await
            {
                Ok(()) => {
                    info!("Acquired migration run lock as {}", holder);
                    Ok(Self { holder })
                }
                Err(StoreError::DuplicateKey { .. }) => Err(MigrationError::LockHeld {
                    holder: "unknown".to_string(),
                    acquired_at: now.to_rfc3339(),
                }),
                Err(e) => Err(e.into()),
            };
        };

        let current_holder = string_field(&current, "holder");
        let acquired_at = string_field(&current, "acquired_at");

        if !is_stale(&acquired_at, now, ttl) {
            return Err(MigrationError::LockHeld {
                holder: current_holder,
                acquired_at,
            });
        }

        warn!(
            "Taking over stale migration run lock held by {} since {}",
            current_holder, acquired_at
        );
        let mut filter = name_filter();
        filter.insert("holder".into(), Value::String(current_holder.clone()));
        let taken = doc
            .update_one(LOCKS_COLLECTION, filter, lock_document(&holder, now))
            .await?;
        if taken == 0 {
            // Another process took it over first
            return Err(MigrationError::LockHeld {
                holder: current_holder,
                acquired_at,
            });
        }

        info!("Acquired migration run lock as {}", holder);
        Ok(Self { holder })
    }

    /// Holder id of this lock.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Releases the lock. A lock taken over by another process is left alone.
    pub async fn release(self, doc: &dyn DocumentStore) -> Result<(), MigrationError> {
        let mut filter = name_filter();
        filter.insert("holder".into(), Value::String(self.holder.clone()));
        let deleted = doc.delete_one(LOCKS_COLLECTION, filter).await?;
        if deleted == 0 {
            warn!(
                "Migration run lock of {} was taken over before release",
                self.holder
            );
        } else {
            debug!("Released migration run lock of {}", self.holder);
        }
        Ok(())
    }
}

async fn ensure_locks_collection(doc: &dyn DocumentStore) -> Result<(), MigrationError> {
    if !doc
        .list_collection_names()
        .await?
        .iter()
        .any(|name| name == LOCKS_COLLECTION)
    {
        doc.create_collection(LOCKS_COLLECTION).await?;
    }
    doc.create_index(
        LOCKS_COLLECTION,
        IndexSpec::new("migration_locks_name_unique", &["name"]).unique(),
    )
    .await?;
    Ok(())
}

fn name_filter() -> Document {
    let mut filter = Map::new();
    filter.insert("name".into(), Value::String(RUN_LOCK_NAME.to_string()));
    filter
}

fn lock_document(holder: &str, acquired_at: DateTime<Utc>) -> Document {
    let mut document = name_filter();
    document.insert("holder".into(), Value::String(holder.to_string()));
    document.insert("acquired_at".into(), Value::String(acquired_at.to_rfc3339()));
    document
}

fn string_field(document: &Document, field: &str) -> String {
    document
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Unparseable timestamps count as stale.
fn is_stale(acquired_at: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
    let Ok(acquired_at) = DateTime::parse_from_rfc3339(acquired_at) else {
        return true;
    };
    match TimeDelta::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(acquired_at.with_timezone(&Utc)) > ttl,
        Err(_) => false,
    }
}
