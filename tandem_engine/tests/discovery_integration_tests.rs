mod common;

use std::path::Path;

use common::{ExecutionLog, LoggedDocumentMigration, MigrationTree, SqlMigration, init_logging};
use tandem_engine::prelude::*;
use tandem_mem::InMemoryDocumentStore;

fn register_document(
    registry: &mut MigrationRegistry,
    path: &Path,
    name: &'static str,
    order: i64,
    log: &ExecutionLog,
) {
    let log = log.clone();
    registry.register(path, move || {
        MigrationScript::document(LoggedDocumentMigration::new(name, order, &log))
    });
}

fn keys(manager: &MigrationManager) -> Vec<String> {
    manager
        .migrations()
        .iter()
        .map(|m| m.key().to_string())
        .collect()
}

#[test]
fn test_only_version_directories_are_scanned() {
    init_logging();
    let tree = MigrationTree::new();
    let log = ExecutionLog::default();
    let mut registry = MigrationRegistry::new();
    for (file, name) in [
        ("shop/migrations/not_a_version/01_a.rs", "in_plain_dir"),
        ("shop/migrations/v20250101/01_b.rs", "in_version_dir"),
        ("shop/migrations/v2025011/01_c.rs", "in_short_dir"),
        ("shop/migrations/_drafts/01_d.rs", "in_draft_dir"),
    ] {
        let path = tree.add_file(file);
        register_document(&mut registry, &path, name, 10, &log);
    }
    let mut manager = MigrationManager::new(MigrationConfig::default(), registry);

    let added = manager
        .discover_module_migrations(&tree.path().join("shop"), "shop", "1.0.0", None)
        .expect("discovery should succeed");

    assert_eq!(added, 1);
    assert_eq!(keys(&manager), vec!["shop:20250101:in_version_dir"]);
}

#[test]
fn test_helper_files_and_unregistered_files_are_skipped() {
    let tree = MigrationTree::new();
    let log = ExecutionLog::default();
    let mut registry = MigrationRegistry::new();
    let registered = tree.add_file("shop/migrations/v20250101/02_registered.rs");
    register_document(&mut registry, &registered, "registered", 20, &log);
    let helper = tree.add_file("shop/migrations/v20250101/_helpers.rs");
    register_document(&mut registry, &helper, "helper", 10, &log);
    let module_file = tree.add_file("shop/migrations/v20250101/mod.rs");
    register_document(&mut registry, &module_file, "module_file", 10, &log);
    tree.add_file("shop/migrations/v20250101/01_unregistered.rs");
    tree.add_file("shop/migrations/v20250101/README.md");
    let mut manager = MigrationManager::new(MigrationConfig::default(), registry);

    let added = manager
        .discover_module_migrations(&tree.path().join("shop"), "shop", "1.0.0", None)
        .expect("discovery should succeed");

    assert_eq!(added, 1);
    assert_eq!(keys(&manager), vec!["shop:20250101:registered"]);
}

#[test]
fn test_duplicate_names_within_a_version_are_skipped() {
    let tree = MigrationTree::new();
    let log = ExecutionLog::default();
    let mut registry = MigrationRegistry::new();
    let first = tree.add_file("shop/migrations/v20250101/01_first.rs");
    register_document(&mut registry, &first, "same", 10, &log);
    let second = tree.add_file("shop/migrations/v20250101/02_second.rs");
    register_document(&mut registry, &second, "same", 20, &log);
    let later = tree.add_file("shop/migrations/v20250102/01_later.rs");
    register_document(&mut registry, &later, "same", 10, &log);
    let mut manager = MigrationManager::new(MigrationConfig::default(), registry);

    let added = manager
        .discover_module_migrations(&tree.path().join("shop"), "shop", "1.0.0", None)
        .expect("discovery should succeed");

    assert_eq!(added, 2);
    assert_eq!(keys(&manager), vec!["shop:20250101:same", "shop:20250102:same"]);
    assert_eq!(manager.migrations()[0].script.order(), 10);
}

#[test]
fn test_one_file_may_define_several_migrations() {
    let tree = MigrationTree::new();
    let log = ExecutionLog::default();
    let mut registry = MigrationRegistry::new();
    let path = tree.add_file("shop/migrations/v20250101/01_setup.rs");
    register_document(&mut registry, &path, "users", 20, &log);
    let sql_log = log.clone();
    registry.register(&path, move || {
        MigrationScript::columnar(SqlMigration::new("events", 10, "SELECT 1", &sql_log))
    });
    let mut manager = MigrationManager::new(MigrationConfig::default(), registry);

    manager
        .discover_module_migrations(&tree.path().join("shop"), "shop", "1.0.0", None)
        .expect("discovery should succeed");

    let migrations = manager.migrations();
    assert_eq!(migrations.len(), 2);
    assert_eq!(migrations[0].script.database_kind(), DatabaseKind::Columnar);
    assert_eq!(migrations[1].script.database_kind(), DatabaseKind::Document);
}

#[test]
fn test_source_root_overrides_matching_path() {
    let tree = MigrationTree::new();
    let log = ExecutionLog::default();
    tree.add_file("installed/billing/migrations/v20250601/01_init.rs");
    let mut registry = MigrationRegistry::new();
    registry.register("crates/billing/src/migrations/v20250601/01_init.rs", {
        let log = log.clone();
        move || MigrationScript::document(LoggedDocumentMigration::new("init", 10, &log))
    });
    let mut manager = MigrationManager::new(MigrationConfig::default(), registry);
    let module_path = tree.path().join("installed/billing");

    let without_root = manager
        .discover_module_migrations(&module_path, "billing", "2.0.0", None)
        .expect("discovery should succeed");
    let with_root = manager
        .discover_module_migrations(
            &module_path,
            "billing",
            "2.0.0",
            Some(Path::new("crates/billing/src")),
        )
        .expect("discovery should succeed");

    assert_eq!(without_root, 0);
    assert_eq!(with_root, 1);
    assert_eq!(keys(&manager), vec!["billing:20250601:init"]);
}

#[test]
fn test_missing_directories_are_not_errors() {
    let tree = MigrationTree::new();
    let config = MigrationConfig {
        core_migrations_dir: Some(tree.path().join("does_not_exist")),
        ..Default::default()
    };
    let mut manager = MigrationManager::new(config, MigrationRegistry::new());

    assert_eq!(manager.discover_app_migrations().expect("no error"), 0);
    assert_eq!(
        manager
            .discover_module_migrations(tree.path(), "shop", "1.0.0", None)
            .expect("no error"),
        0
    );
}

#[tokio::test]
async fn test_discovered_core_and_module_migrations_run_core_first() {
    init_logging();
    let tree = MigrationTree::new();
    let log = ExecutionLog::default();
    let mut registry = MigrationRegistry::new();
    let module_file = tree.add_file("modules/shop/migrations/v20240101/01_shop.rs");
    register_document(&mut registry, &module_file, "shop_init", 10, &log);
    let core_file = tree.add_file("app/migrations/v20250101/01_core.rs");
    register_document(&mut registry, &core_file, "core_init", 10, &log);
    let config = MigrationConfig {
        core_migrations_dir: Some(tree.path().join("app/migrations")),
        ..Default::default()
    };
    let mut manager = MigrationManager::new(config, registry);

    manager
        .discover_module_migrations(&tree.path().join("modules/shop"), "shop", "1.0.0", None)
        .expect("discovery should succeed");
    manager
        .discover_app_migrations()
        .expect("discovery should succeed");
    let store = InMemoryDocumentStore::new();
    let executed = manager
        .run_pending_migrations(&store, None)
        .await
        .expect("run should succeed");

    assert_eq!(executed, 2);
    assert_eq!(log.entries(), vec!["core_init", "shop_init"]);
    let records = manager
        .applied(&store, RecordFilter::default())
        .await
        .expect("records should load");
    assert!(records
        .iter()
        .any(|r| r.module == "core" && r.version == "20250101"));
}
