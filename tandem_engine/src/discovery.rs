//! Filesystem discovery of migration scripts.
//!
//! A migrations tree holds one directory per version, named `vYYYYMMDD`, and
//! one Rust file per script inside it:
//!
//! ```text
//! migrations/
//!   v20250601/
//!     mod.rs
//!     01_create_invoices.rs
//!     02_backfill_totals.rs
//! ```
//!
//! A file is matched to the scripts registered from it (see
//! [`crate::registry`]); the version comes from the directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, error, warn};
use regex::Regex;

use crate::error::MigrationError;
use crate::manager::MigrationManager;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v(\d{8})$").expect("version pattern is a valid regex")
});

/// The `YYYYMMDD` version named by a version directory, if it is one.
pub fn parse_version_dir(name: &str) -> Option<&str> {
    VERSION_PATTERN
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|version| version.as_str())
}

impl MigrationManager {
    /// Discovers the core migrations under `config.core_migrations_dir`.
    ///
    /// A missing or unset directory is not an error. Returns the number of
    /// scripts added.
    pub fn discover_app_migrations(&mut self) -> Result<usize, MigrationError> {
        let Some(dir) = self.config.core_migrations_dir.clone() else {
            debug!("No core migrations directory configured");
            return Ok(0);
        };
        if !dir.is_dir() {
            debug!("Core migrations directory {} does not exist", dir.display());
            return Ok(0);
        }

        let module = self.config.core_module_name.clone();
        self.discover_tree(&dir, &module, None)
    }

    /// Discovers the migrations of a module in `<module_path>/migrations`.
    ///
    /// `module_version` is only logged; versions come from the date
    /// directories. When the registrations were compiled from a different
    /// location than `module_path` (a vendored or installed copy), pass that
    /// location as `source_root` to match them.
    ///
    /// Returns the number of scripts added.
    pub fn discover_module_migrations(
        &mut self,
        module_path: &Path,
        module_name: &str,
        module_version: &str,
        source_root: Option<&Path>,
    ) -> Result<usize, MigrationError> {
        let dir = module_path.join("migrations");
        if !dir.is_dir() {
            debug!(
                "Module {} has no migrations directory at {}",
                module_name,
                dir.display()
            );
            return Ok(0);
        }

        debug!(
            "Discovering migrations of module {} {} in {}",
            module_name,
            module_version,
            dir.display()
        );
        let match_root = source_root.map(|root| root.join("migrations"));
        self.discover_tree(&dir, module_name, match_root.as_deref())
    }

    fn discover_tree(
        &mut self,
        dir: &Path,
        module: &str,
        match_root: Option<&Path>,
    ) -> Result<usize, MigrationError> {
        let mut added = 0;

        for version_dir in sorted_entries(dir)? {
            if !version_dir.is_dir() {
                continue;
            }
            let Some(dir_name) = version_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if dir_name.starts_with('_') {
                continue;
            }
            let Some(version) = parse_version_dir(dir_name) else {
                warn!(
                    "Skipping {}: not a vYYYYMMDD version directory",
                    version_dir.display()
                );
                continue;
            };
            let version = version.to_string();

            let files = match sorted_entries(&version_dir) {
                Ok(files) => files,
                Err(e) => {
                    warn!("Cannot read {}: {}", version_dir.display(), e);
                    continue;
                }
            };

            for file in files.iter().filter(|f| is_script_file(f)) {
                let match_path = match match_root {
                    Some(root) => file
                        .strip_prefix(dir)
                        .map(|relative| root.join(relative))
                        .unwrap_or_else(|_| file.clone()),
                    None => file.clone(),
                };

                let scripts = self.registry.scripts_for(&match_path);
                if scripts.is_empty() {
                    error!(
                        "No migration registered in {}, skipping it",
                        file.display()
                    );
                    continue;
                }
                for script in scripts {
                    if self.add_migration(module, &version, script) {
                        added += 1;
                    }
                }
            }
        }

        debug!("Discovered {} migrations of module {}", added, module);
        Ok(added)
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn is_script_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.is_file()
        && path.extension().is_some_and(|ext| ext == "rs")
        && !name.starts_with('_')
        && name != "mod.rs"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_directories_need_eight_digits() {
        assert_eq!(parse_version_dir("v20250101"), Some("20250101"));
        assert_eq!(parse_version_dir("v2025011"), None);
        assert_eq!(parse_version_dir("v202501011"), None);
        assert_eq!(parse_version_dir("20250101"), None);
        assert_eq!(parse_version_dir("not_a_version"), None);
    }

    #[test]
    fn only_plain_rust_files_are_scripts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["01_init.rs", "_helpers.rs", "mod.rs", "notes.md"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        assert!(is_script_file(&dir.path().join("01_init.rs")));
        assert!(!is_script_file(&dir.path().join("_helpers.rs")));
        assert!(!is_script_file(&dir.path().join("mod.rs")));
        assert!(!is_script_file(&dir.path().join("notes.md")));
        assert!(!is_script_file(&dir.path().join("missing.rs")));
    }
}
