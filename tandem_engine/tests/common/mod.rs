#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tandem_engine::prelude::*;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Names of executed migrations, in execution order.
#[derive(Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<Vec<String>>>);

impl ExecutionLog {
    pub fn push(&self, name: &str) {
        self.0.lock().expect("log lock").push(name.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("log lock").clone()
    }
}

/// A document migration that records its execution and optionally fails its
/// first `failures` runs.
pub struct LoggedDocumentMigration {
    pub name: &'static str,
    pub order: i64,
    pub log: ExecutionLog,
    pub failures: Arc<AtomicUsize>,
}

impl LoggedDocumentMigration {
    pub fn new(name: &'static str, order: i64, log: &ExecutionLog) -> Self {
        Self {
            name,
            order,
            log: log.clone(),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(mut self, failures: &Arc<AtomicUsize>) -> Self {
        self.failures = failures.clone();
        self
    }
}

impl MigrationInfo for LoggedDocumentMigration {
    fn name(&self) -> &'static str {
        self.name
    }

    fn order(&self) -> i64 {
        self.order
    }
}

#[async_trait]
impl DocumentMigration for LoggedDocumentMigration {
    async fn run(&self, db: &dyn DocumentStore) -> Result<(), BoxError> {
        self.log.push(self.name);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(format!("{} not ready", self.name).into());
        }
        db.create_collection(self.name).await?;
        Ok(())
    }
}

/// A columnar migration sending fixed SQL, or failing with `error`.
pub struct SqlMigration {
    pub name: &'static str,
    pub order: i64,
    pub sql: &'static str,
    pub error: Option<&'static str>,
    pub log: ExecutionLog,
}

impl SqlMigration {
    pub fn new(name: &'static str, order: i64, sql: &'static str, log: &ExecutionLog) -> Self {
        Self {
            name,
            order,
            sql,
            error: None,
            log: log.clone(),
        }
    }

    pub fn failing_with(mut self, error: &'static str) -> Self {
        self.error = Some(error);
        self
    }
}

impl MigrationInfo for SqlMigration {
    fn name(&self) -> &'static str {
        self.name
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn source(&self) -> Option<&'static str> {
        Some(self.sql)
    }
}

#[async_trait]
impl ColumnarMigration for SqlMigration {
    async fn run(&self, db: &dyn ColumnarClient) -> Result<(), BoxError> {
        self.log.push(self.name);
        if let Some(error) = self.error {
            return Err(error.into());
        }
        db.command(self.sql).await?;
        Ok(())
    }
}

/// A temporary migrations tree.
pub struct MigrationTree {
    dir: TempDir,
}

impl MigrationTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Creates `relative` (parents included) with placeholder content.
    pub fn add_file(&self, relative: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().expect("file has a parent"))
            .expect("Failed to create directories");
        fs::write(&path, "// migration\n").expect("Failed to write file");
        path
    }
}

pub fn find_record(records: &[MigrationRecord], name: &str) -> Option<MigrationRecord> {
    records.iter().find(|r| r.name == name).cloned()
}
