//! Helpers for creating new migration files in a project tree.
//!
//! Core migrations live in `<base>/app/migrations`, module migrations in
//! `<base>/modules/<module>/migrations`. New files go into today's version
//! directory and are declared in its `mod.rs` so the registrations they
//! contain are compiled in.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};

/// Name of today's version directory, `v` followed by the UTC date.
pub fn current_version_dir() -> String {
    version_dir_for(Utc::now().date_naive())
}

fn version_dir_for(date: NaiveDate) -> String {
    format!("v{}", date.format("%Y%m%d"))
}

/// Creates the migrations directory of `module` (the core app when `None`)
/// and today's version directory inside it.
///
/// Returns `(migrations_dir, version_dir)`.
pub fn ensure_migration_dir(
    base: &Path,
    module: Option<&str>,
) -> io::Result<(PathBuf, PathBuf)> {
    ensure_version_dir(base, module, &current_version_dir())
}

fn ensure_version_dir(
    base: &Path,
    module: Option<&str>,
    version: &str,
) -> io::Result<(PathBuf, PathBuf)> {
    let migrations_dir = match module {
        Some(module) => base.join("modules").join(module).join("migrations"),
        None => base.join("app").join("migrations"),
    };
    fs::create_dir_all(&migrations_dir)?;

    let root_mod = migrations_dir.join("mod.rs");
    if !root_mod.exists() {
        fs::write(&root_mod, "// Migration version directories\n")?;
    }

    let version_dir = migrations_dir.join(version);
    fs::create_dir_all(&version_dir)?;
    append_line_once(&root_mod, &format!("mod {version};"))?;

    let version_mod = version_dir.join("mod.rs");
    if !version_mod.exists() {
        fs::write(
            &version_mod,
            format!("// Migrations created on {}\n", Utc::now().format("%Y-%m-%d")),
        )?;
    }

    Ok((migrations_dir, version_dir))
}

/// Writes `template` to a new migration file `NN_<name>.rs` in today's
/// version directory, `NN` being one past the highest existing number, and
/// declares it in the directory's `mod.rs`.
///
/// Returns the path of the new file.
pub fn create_migration_file(
    base: &Path,
    name: &str,
    template: &str,
    module: Option<&str>,
) -> io::Result<PathBuf> {
    let (_, version_dir) = ensure_migration_dir(base, module)?;
    create_in_version_dir(&version_dir, name, template)
}

fn create_in_version_dir(version_dir: &Path, name: &str, template: &str) -> io::Result<PathBuf> {
    let mut highest = 0;
    for entry in fs::read_dir(version_dir)? {
        let file_name = entry?.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.ends_with(".rs") || file_name.starts_with('_') {
            continue;
        }
        if let Some(order) = file_name
            .split('_')
            .next()
            .and_then(|prefix| prefix.parse::<u32>().ok())
        {
            highest = highest.max(order);
        }
    }

    let file_name = format!("{:02}_{}.rs", highest + 1, name);
    let path = version_dir.join(&file_name);
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    fs::write(&path, template)?;

    let module_name = format!("m{}", file_name.trim_end_matches(".rs"));
    append_line_once(
        &version_dir.join("mod.rs"),
        &format!("#[path = \"{file_name}\"]\nmod {module_name};"),
    )?;

    log::info!("Created migration {}", path.display());
    Ok(path)
}

fn append_line_once(path: &Path, line: &str) -> io::Result<()> {
    let existing = fs::read_to_string(path).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == line.lines().last().unwrap_or(line)) {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_dir_uses_the_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 8).unwrap();
        assert_eq!(version_dir_for(date), "v20250308");
        assert_eq!(current_version_dir().len(), 9);
    }

    #[test]
    fn module_and_core_trees_are_created() {
        let base = tempfile::tempdir().unwrap();

        let (core, core_version) = ensure_version_dir(base.path(), None, "v20250308").unwrap();
        let (billing, _) = ensure_version_dir(base.path(), Some("billing"), "v20250308").unwrap();
        ensure_version_dir(base.path(), None, "v20250308").unwrap();

        assert_eq!(core, base.path().join("app/migrations"));
        assert_eq!(billing, base.path().join("modules/billing/migrations"));
        assert!(core_version.join("mod.rs").is_file());
        let root_mod = fs::read_to_string(core.join("mod.rs")).unwrap();
        assert_eq!(root_mod.matches("mod v20250308;").count(), 1);
    }

    #[test]
    fn files_are_numbered_and_declared() {
        let base = tempfile::tempdir().unwrap();
        let (_, version_dir) = ensure_version_dir(base.path(), None, "v20250308").unwrap();

        let first = create_in_version_dir(&version_dir, "create_users", "// first").unwrap();
        let second = create_in_version_dir(&version_dir, "backfill", "// second").unwrap();

        assert_eq!(first.file_name().unwrap(), "01_create_users.rs");
        assert_eq!(second.file_name().unwrap(), "02_backfill.rs");
        assert_eq!(fs::read_to_string(&second).unwrap(), "// second");
        let mod_rs = fs::read_to_string(version_dir.join("mod.rs")).unwrap();
        assert!(mod_rs.contains("#[path = \"01_create_users.rs\"]\nmod m01_create_users;"));
        assert!(mod_rs.contains("mod m02_backfill;"));
    }

    #[test]
    fn create_migration_file_uses_todays_directory() {
        let base = tempfile::tempdir().unwrap();

        let path = create_migration_file(base.path(), "init", "", Some("shop")).unwrap();

        assert_eq!(
            path,
            base.path()
                .join("modules/shop/migrations")
                .join(current_version_dir())
                .join("01_init.rs")
        );
    }
}
