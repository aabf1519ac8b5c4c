//! Configuration types for the migration engine.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Environment variable holding the single-node columnar DSN.
pub const CLICKHOUSE_DSN_ENV: &str = "CLICKHOUSE_DSN";
/// Environment variable holding the cluster name.
pub const CLICKHOUSE_CLUSTER_NAME_ENV: &str = "CLICKHOUSE_CLUSTER_NAME";
/// Environment variable holding the comma separated cluster node DSNs.
pub const CLICKHOUSE_CLUSTER_DSN_LIST_ENV: &str = "CLICKHOUSE_CLUSTER_DSN_LIST";
/// Environment variable pointing at the core migrations tree.
pub const MIGRATIONS_CORE_DIR_ENV: &str = "MIGRATIONS_CORE_DIR";
/// Environment variable selecting the [`InstanceMode`] (`single` or `coordinated`).
pub const MIGRATIONS_INSTANCE_MODE_ENV: &str = "MIGRATIONS_INSTANCE_MODE";

/// Retry behaviour for columnar statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per statement, the first one included.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    /// Subsequent delays double.
    pub initial_delay: Duration,

    /// Upper bound of a single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Cluster deployment of the columnar store.
///
/// Cluster mode is only active when both a node list and a cluster name are
/// configured. Without either, DDL is sent unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Name of the cluster used in `ON CLUSTER` clauses.
    pub name: Option<String>,

    /// Node addresses of the cluster.
    pub nodes: Vec<String>,

    /// DSN of the default node. Its path names the database used for
    /// unqualified tables.
    pub dsn: Option<String>,

    /// Emit a `Distributed` companion table next to every replicated table
    /// (and drop it with the table).
    pub create_distributed_tables: bool,
}

impl ClusterConfig {
    /// Creates a cluster configuration for `name` over `nodes`.
    pub fn new<I, S>(name: impl Into<String>, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: Some(name.into()),
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the default DSN.
    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    /// Reads the cluster settings from the process environment.
    pub fn from_env() -> Self {
        let nodes = std::env::var(CLICKHOUSE_CLUSTER_DSN_LIST_ENV)
            .map(|list| parse_list(&list))
            .unwrap_or_default();
        Self {
            name: std::env::var(CLICKHOUSE_CLUSTER_NAME_ENV).ok(),
            nodes,
            dsn: std::env::var(CLICKHOUSE_DSN_ENV).ok(),
            create_distributed_tables: false,
        }
    }

    /// Whether DDL should be rewritten for the cluster.
    pub fn is_enabled(&self) -> bool {
        self.cluster_name().is_some() && self.nodes.iter().any(|n| !n.trim().is_empty())
    }

    /// The trimmed cluster name, if one is set.
    pub fn cluster_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Database named by the DSN path. `None` when the DSN is absent,
    /// malformed or has no path.
    pub fn default_database(&self) -> Option<String> {
        let dsn = self.dsn.as_deref()?;
        let url = Url::parse(dsn).ok()?;
        let database = url.path().trim_start_matches('/');
        (!database.is_empty()).then(|| database.to_string())
    }
}

/// Accepts a JSON array of strings, falling back to a comma separated
/// `a,b,c` list for anything that does not parse as one.
fn parse_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
        return items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
    }
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Determines how concurrent runs from several processes coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum InstanceMode {
    /// No coordination. Use when a single process runs migrations.
    #[default]
    SingleInstance,

    /// Hold a lock document in the document store for the duration of a run.
    /// A second process fails fast with [`crate::MigrationError::LockHeld`]
    /// instead of executing the same DDL concurrently.
    Coordinated,
}

/// Configuration of a [`crate::MigrationManager`].
#[derive(Clone)]
pub struct MigrationConfig {
    /// Module name the core migrations are recorded under.
    pub core_module_name: String,

    /// Root of the core migrations tree (the directory holding the
    /// `vYYYYMMDD` buckets). `None` disables core discovery.
    pub core_migrations_dir: Option<PathBuf>,

    /// Columnar cluster deployment.
    pub cluster: ClusterConfig,

    /// Retry behaviour of columnar statements.
    pub retry: RetryConfig,

    /// Cross-process coordination.
    pub instance_mode: InstanceMode,

    /// Age after which a run lock is considered abandoned and taken over.
    pub lock_ttl: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            core_module_name: "core".to_string(),
            core_migrations_dir: None,
            cluster: ClusterConfig::default(),
            retry: RetryConfig::default(),
            instance_mode: InstanceMode::SingleInstance,
            lock_ttl: Duration::from_secs(600),
        }
    }
}

impl MigrationConfig {
    /// Reads the configuration from the process environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let instance_mode = match std::env::var(MIGRATIONS_INSTANCE_MODE_ENV)
            .map(|mode| mode.to_lowercase())
            .as_deref()
        {
            Ok("coordinated") => InstanceMode::Coordinated,
            _ => InstanceMode::SingleInstance,
        };
        Self {
            core_migrations_dir: std::env::var_os(MIGRATIONS_CORE_DIR_ENV).map(PathBuf::from),
            cluster: ClusterConfig::from_env(),
            instance_mode,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("core_module_name", &self.core_module_name)
            .field("core_migrations_dir", &self.core_migrations_dir)
            .field("cluster_enabled", &self.cluster.is_enabled())
            .field("cluster_name", &self.cluster.cluster_name())
            .field("cluster_nodes", &self.cluster.nodes.len())
            .field("retry", &self.retry)
            .field("instance_mode", &self.instance_mode)
            .field("lock_ttl", &self.lock_ttl)
            .finish()
    }
}
