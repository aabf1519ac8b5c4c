//! The migration manager: holds the discovered scripts and runs the ones that
//! have not succeeded yet.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tandem_engine::{MigrationConfig, MigrationManager, MigrationRegistry};
//!
//! let mut manager = MigrationManager::new(MigrationConfig::from_env(), MigrationRegistry::collected());
//! manager.discover_app_migrations()?;
//! manager.discover_module_migrations(&billing_dir, "billing", "1.4.0", None)?;
//!
//! let executed = manager.run_pending_migrations(&mongo, Some(&clickhouse)).await?;
//! println!("Executed {} migrations", executed);
//! ```

use std::collections::{HashMap, HashSet};

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use tandem_core::MIGRATIONS_COLLECTION;
use tandem_core::prelude::*;

use crate::client::ClusterAwareClient;
use crate::cluster::ClusterRewriter;
use crate::config::{InstanceMode, MigrationConfig};
use crate::error::MigrationError;
use crate::lock::RunLock;
use crate::registry::MigrationRegistry;
use crate::script::{DiscoveredMigration, MigrationScript};

/// What the tracking collection says about past executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    /// Migrations whose last attempt succeeded.
    pub succeeded: HashSet<MigrationKey>,
    /// Migrations whose last attempt failed.
    pub failed: HashSet<MigrationKey>,
    /// Checksum recorded by the last attempt, where one was recorded.
    pub checksums: HashMap<MigrationKey, String>,
}

/// Discovers, orders and executes migrations across the document and the
/// columnar store.
///
/// Execution is strictly sequential. Every attempt is recorded in the
/// `migrations` collection of the document store, and a migration is only
/// skipped once it has a successful record.
pub struct MigrationManager {
    pub(crate) config: MigrationConfig,
    pub(crate) registry: MigrationRegistry,
    rewriter: ClusterRewriter,
    modules: Vec<String>,
    migrations: Vec<DiscoveredMigration>,
}

impl MigrationManager {
    /// Creates a manager with no migrations.
    pub fn new(config: MigrationConfig, registry: MigrationRegistry) -> Self {
        let rewriter = ClusterRewriter::new(config.cluster.clone());
        Self {
            config,
            registry,
            rewriter,
            modules: Vec::new(),
            migrations: Vec::new(),
        }
    }

    /// The configuration the manager was created with.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Registers `script` under `module` and `version`.
    ///
    /// Returns `false`, and logs an error, when the module already has a
    /// migration of the same name in that version.
    pub fn add_migration(&mut self, module: &str, version: &str, script: MigrationScript) -> bool {
        let duplicate = self
            .migrations
            .iter()
            .any(|m| m.module == module && m.version == version && m.script.name() == script.name());
        if duplicate {
            error!(
                "Duplicate migration {}:{}:{}, skipping",
                module,
                version,
                script.name()
            );
            return false;
        }

        if !self.modules.iter().any(|m| m == module) {
            self.modules.push(module.to_string());
        }
        debug!(
            "Registered {} migration {}:{}:{}",
            script.database_kind(),
            module,
            version,
            script.name()
        );
        self.migrations.push(DiscoveredMigration {
            module: module.to_string(),
            version: version.to_string(),
            script,
        });
        true
    }

    /// Every known migration in execution order.
    ///
    /// Modules run in the order they were first registered, with the core
    /// module always first. Versions run in ascending order and migrations
    /// within a version by ascending `order`, ties keeping registration
    /// order.
    pub fn migrations(&self) -> Vec<&DiscoveredMigration> {
        let mut ordered: Vec<&DiscoveredMigration> = self.migrations.iter().collect();
        ordered.sort_by(|a, b| {
            (self.module_rank(&a.module), &a.version, a.script.order()).cmp(&(
                self.module_rank(&b.module),
                &b.version,
                b.script.order(),
            ))
        });
        ordered
    }

    fn module_rank(&self, module: &str) -> usize {
        if module == self.config.core_module_name {
            return 0;
        }
        self.modules
            .iter()
            .position(|m| m == module)
            .map_or(usize::MAX, |position| position + 1)
    }

    /// Ensures the tracking collection and its indexes exist.
    pub async fn ensure_tracking_collection(
        &self,
        doc: &dyn DocumentStore,
    ) -> Result<(), MigrationError> {
        let collections = doc.list_collection_names().await?;
        if !collections.iter().any(|name| name == MIGRATIONS_COLLECTION) {
            info!("Creating {} collection", MIGRATIONS_COLLECTION);
            doc.create_collection(MIGRATIONS_COLLECTION).await?;
        }
        doc.create_index(
            MIGRATIONS_COLLECTION,
            IndexSpec::new("module_version_name_unique", &["module", "version", "name"]).unique(),
        )
        .await?;
        doc.create_index(
            MIGRATIONS_COLLECTION,
            IndexSpec::new("module_success", &["module", "success"]),
        )
        .await?;
        Ok(())
    }

    /// Reads the outcome of past executions from the tracking collection.
    ///
    /// Only the key fields, `success` and `checksum` are read, so records
    /// written by older versions still count. A missing `success` counts as
    /// succeeded. Documents without a string key are logged and ignored.
    pub async fn load_execution_state(
        &self,
        doc: &dyn DocumentStore,
    ) -> Result<ExecutionState, MigrationError> {
        let mut state = ExecutionState::default();
        for document in doc.find(MIGRATIONS_COLLECTION, Map::new()).await? {
            let field = |name: &str| document.get(name).and_then(Value::as_str);
            let (Some(module), Some(version), Some(name)) =
                (field("module"), field("version"), field("name"))
            else {
                warn!("Ignoring migration record without a key: {:?}", document);
                continue;
            };
            let key = MigrationKey::new(module, version, name);
            if let Some(checksum) = field("checksum") {
                state.checksums.insert(key.clone(), checksum.to_string());
            }
            let success = document
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if success {
                state.succeeded.insert(key);
            } else {
                state.failed.insert(key);
            }
        }
        Ok(state)
    }

    /// Runs every migration that has not succeeded yet.
    ///
    /// Stops at the first failing migration: its failure is recorded and
    /// returned as [`MigrationError::MigrationFailed`], migrations after it
    /// do not run. Columnar migrations are skipped, with an error logged,
    /// when no columnar client is given.
    ///
    /// Returns the number of migrations executed.
    pub async fn run_pending_migrations(
        &self,
        doc: &dyn DocumentStore,
        columnar: Option<&dyn ColumnarClient>,
    ) -> Result<usize, MigrationError> {
        self.ensure_tracking_collection(doc).await?;

        let lock = match self.config.instance_mode {
            InstanceMode::SingleInstance => None,
            InstanceMode::Coordinated => Some(RunLock::acquire(doc, self.config.lock_ttl).await?),
        };

        let result = self.run_migrations(doc, columnar).await;

        if let Some(lock) = lock {
            if let Err(e) = lock.release(doc).await {
                warn!("Failed to release migration run lock: {}", e);
            }
        }

        result
    }

    async fn run_migrations(
        &self,
        doc: &dyn DocumentStore,
        columnar: Option<&dyn ColumnarClient>,
    ) -> Result<usize, MigrationError> {
        let mut state = self.load_execution_state(doc).await?;
        let mut executed = 0;

        for migration in self.migrations() {
            let key = migration.key();
            if state.succeeded.contains(&key) {
                let current = migration.script.info().checksum();
                match state.checksums.get(&key) {
                    Some(recorded) if *recorded != current => warn!(
                        "Migration {} changed since it was executed (checksum {} != {})",
                        key, recorded, current
                    ),
                    _ => {}
                }
                debug!("Skipping migration {}: already executed", key);
                continue;
            }

            info!("Running {} migration {}...", migration.script.database_kind(), key);

            let outcome = match &migration.script {
                MigrationScript::Document(script) => {
                    script.execute(doc, &key.module, &key.version).await
                }
                MigrationScript::Columnar(script) => {
                    let Some(columnar) = columnar else {
                        error!("No columnar client available, skipping migration {}", key);
                        continue;
                    };
                    let client = ClusterAwareClient::new(
                        columnar,
                        &self.rewriter,
                        &self.config.retry,
                        script.name(),
                    );
                    script.execute(&client, &key.module, &key.version).await
                }
            };

            let retrying = state.failed.contains(&key);
            match outcome {
                Ok(record) => {
                    save_record(doc, &record, retrying).await?;
                    info!(
                        "Migration {} executed in {:.1}ms",
                        key, record.execution_time_ms
                    );
                    state.failed.remove(&key);
                    state.succeeded.insert(key);
                    executed += 1;
                }
                Err(failure) => {
                    if let Err(e) = save_record(doc, &failure.record, retrying).await {
                        error!("Failed to record failure of migration {}: {}", key, e);
                    }
                    return Err(MigrationError::MigrationFailed {
                        key,
                        source: failure.source,
                    });
                }
            }
        }

        if executed > 0 {
            info!("Executed {} migrations", executed);
        }
        Ok(executed)
    }

    /// Migrations that have not succeeded yet, in execution order.
    pub async fn pending(
        &self,
        doc: &dyn DocumentStore,
    ) -> Result<Vec<&DiscoveredMigration>, MigrationError> {
        self.ensure_tracking_collection(doc).await?;
        let state = self.load_execution_state(doc).await?;

        Ok(self
            .migrations()
            .into_iter()
            .filter(|m| !state.succeeded.contains(&m.key()))
            .collect())
    }

    /// Stored execution records matching `filter`, oldest first.
    pub async fn applied(
        &self,
        doc: &dyn DocumentStore,
        filter: RecordFilter,
    ) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.ensure_tracking_collection(doc).await?;

        let mut records = doc
            .find(MIGRATIONS_COLLECTION, filter.to_document())
            .await?
            .into_iter()
            .map(MigrationRecord::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| a.executed_at.cmp(&b.executed_at));
        Ok(records)
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("config", &self.config)
            .field("modules", &self.modules)
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

/// Writes `record` over the stored record of a previous attempt, or inserts
/// it on a first attempt. A failure record never replaces a success record.
async fn save_record(
    doc: &dyn DocumentStore,
    record: &MigrationRecord,
    retrying: bool,
) -> Result<(), MigrationError> {
    let document = record.to_document()?;
    let key = record.key();
    let mut filter = key.filter();
    if !record.success {
        filter.insert("success".into(), Value::Bool(false));
    }

    if retrying {
        let matched = doc
            .update_one(MIGRATIONS_COLLECTION, filter.clone(), document.clone())
            .await?;
        if matched > 0 {
            return Ok(());
        }
    }

    match doc.insert_one(MIGRATIONS_COLLECTION, document.clone()).await {
        Ok(()) => Ok(()),
        Err(StoreError::DuplicateKey { .. }) => {
            // Recorded by someone else since the state was loaded
            let matched = doc
                .update_one(MIGRATIONS_COLLECTION, filter, document)
                .await?;
            if matched == 0 {
                warn!(
                    "Migration {} already succeeded elsewhere, keeping its record",
                    key
                );
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
