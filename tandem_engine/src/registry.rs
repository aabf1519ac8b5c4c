//! Migration registration.
//!
//! Scripts register themselves with [`register_document_migration!`] or
//! [`register_columnar_migration!`] in the file that defines them. The
//! registration carries the defining file's path, which discovery matches
//! against the files it finds in the migrations tree: a file is a migration
//! file when some registration was made from it.
//!
//! [`register_document_migration!`]: crate::register_document_migration
//! [`register_columnar_migration!`]: crate::register_columnar_migration

use std::path::{Path, PathBuf};

use crate::script::MigrationScript;

/// A script registered at compile time.
///
/// Submitted to the inventory by the registration macros; not usually
/// constructed by hand.
pub struct MigrationRegistration {
    /// Path of the defining file, as reported by `file!()`.
    pub source_file: &'static str,
    /// Builds a fresh instance of the script.
    pub build: fn() -> MigrationScript,
}

impl MigrationRegistration {
    /// Creates a registration.
    pub const fn new(source_file: &'static str, build: fn() -> MigrationScript) -> Self {
        Self { source_file, build }
    }
}

inventory::collect!(MigrationRegistration);

/// All scripts registered through the registration macros.
pub fn registered_migrations() -> impl Iterator<Item = &'static MigrationRegistration> {
    inventory::iter::<MigrationRegistration>()
}

type ScriptFactory = Box<dyn Fn() -> MigrationScript + Send + Sync>;

struct Entry {
    source_file: PathBuf,
    factory: ScriptFactory,
}

/// Maps source files to the scripts defined in them.
#[derive(Default)]
pub struct MigrationRegistry {
    entries: Vec<Entry>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every macro registration linked into the
    /// binary.
    pub fn collected() -> Self {
        let mut registry = Self::new();
        for registration in registered_migrations() {
            registry.register(registration.source_file, registration.build);
        }
        log::debug!("Collected {} registered migrations", registry.len());
        registry
    }

    /// Registers a script factory for `source_file`.
    pub fn register<F>(&mut self, source_file: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> MigrationScript + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            source_file: source_file.into(),
            factory: Box::new(factory),
        });
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the scripts registered for `path`, in registration order.
    ///
    /// `file!()` paths are relative to the crate or workspace root while
    /// discovered paths usually are absolute, so a registration matches when
    /// either path ends with the other, compared component-wise.
    pub fn scripts_for(&self, path: &Path) -> Vec<MigrationScript> {
        self.entries
            .iter()
            .filter(|entry| paths_match(&entry.source_file, path))
            .map(|entry| (entry.factory)())
            .collect()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field(
                "source_files",
                &self.entries.iter().map(|e| &e.source_file).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn paths_match(registered: &Path, discovered: &Path) -> bool {
    if registered.as_os_str().is_empty() || discovered.as_os_str().is_empty() {
        return false;
    }
    registered.ends_with(discovered) || discovered.ends_with(registered)
}

/// Registers a [`DocumentMigration`](crate::DocumentMigration) defined in the
/// current file.
///
/// ```rust,ignore
/// tandem_engine::register_document_migration!(CreateUserCollection);
/// ```
#[macro_export]
macro_rules! register_document_migration {
    ($migration:expr) => {
        const _: () = {
            fn __build() -> $crate::MigrationScript {
                $crate::MigrationScript::document($migration)
            }

            $crate::inventory::submit! {
                $crate::MigrationRegistration::new(file!(), __build)
            }
        };
    };
}

/// Registers a [`ColumnarMigration`](crate::ColumnarMigration) defined in the
/// current file.
#[macro_export]
macro_rules! register_columnar_migration {
    ($migration:expr) => {
        const _: () = {
            fn __build() -> $crate::MigrationScript {
                $crate::MigrationScript::columnar($migration)
            }

            $crate::inventory::submit! {
                $crate::MigrationRegistration::new(file!(), __build)
            }
        };
    };
}
