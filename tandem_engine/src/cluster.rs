//! Rewrites single-node DDL into cluster-aware DDL for the columnar store.
//!
//! Migration authors write plain DDL. When a cluster is configured, every
//! recognised DDL statement gets an `ON CLUSTER '<name>'` clause after its
//! object name and MergeTree family engines become their `Replicated*`
//! counterparts with coordination parameters
//! `('/clickhouse/tables/{shard}/<db>.<table>', '{replica}')`. The `{shard}`
//! and `{replica}` macros are left for the server to substitute.
//!
//! This is a pattern based heuristic, not a SQL parser. Statements of any
//! other shape are passed through unchanged, and migrations that need full
//! control can use `Replicated*` engines and `ON CLUSTER` directly: a
//! statement that already names a cluster is never touched.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::ClusterConfig;

const IDENT: &str = r"(?:`[^`]+`|\w+)";

fn ddl_pattern(prefix: &str) -> Regex {
    let pattern = format!(r"(?is)^({prefix})({IDENT}\.)?({IDENT})(.*)$");
    Regex::new(&pattern).expect("static DDL pattern")
}

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    ddl_pattern(r"CREATE\s+(?:OR\s+REPLACE\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?")
});

static CREATE_VIEW: LazyLock<Regex> = LazyLock::new(|| {
    ddl_pattern(
        r"CREATE\s+(?:OR\s+REPLACE\s+)?(?:MATERIALIZED\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?",
    )
});

static CREATE_DATABASE: LazyLock<Regex> =
    LazyLock::new(|| ddl_pattern(r"CREATE\s+DATABASE\s+(?:IF\s+NOT\s+EXISTS\s+)?"));

static DROP: LazyLock<Regex> = LazyLock::new(|| {
    ddl_pattern(r"DROP\s+(?:TABLE|VIEW|DICTIONARY|DATABASE)\s+(?:IF\s+EXISTS\s+)?")
});

static ALTER_TABLE: LazyLock<Regex> = LazyLock::new(|| ddl_pattern(r"ALTER\s+TABLE\s+"));

static ENGINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ENGINE\s*=\s*(\w+)(\s*\([^)]*\))?").expect("static engine pattern")
});

static ON_CLUSTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bON\s+CLUSTER\b").expect("static cluster pattern"));

const DML_KEYWORDS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"];

/// A DDL statement split into the parts around its object name.
struct DdlParts<'a> {
    prefix: &'a str,
    qualifier: &'a str,
    name: &'a str,
    rest: &'a str,
}

impl<'a> DdlParts<'a> {
    fn capture(pattern: &Regex, statement: &'a str) -> Option<Self> {
        let captures = pattern.captures(statement)?;
        Some(Self {
            prefix: captures.get(1).map_or("", |m| m.as_str()),
            qualifier: captures.get(2).map_or("", |m| m.as_str()),
            name: captures.get(3).map_or("", |m| m.as_str()),
            rest: captures.get(4).map_or("", |m| m.as_str()),
        })
    }

    fn database(&self) -> Option<String> {
        let database = unquote(self.qualifier.trim_end_matches('.'));
        (!database.is_empty()).then(|| database.to_string())
    }

    fn with_cluster(&self, cluster: &str, rest: &str) -> String {
        format!(
            "{}{}{} ON CLUSTER '{}'{}",
            self.prefix, self.qualifier, self.name, cluster, rest
        )
    }
}

fn unquote(identifier: &str) -> &str {
    identifier.trim_matches('`')
}

/// Rewrites DDL for a configured columnar cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterRewriter {
    config: ClusterConfig,
}

impl ClusterRewriter {
    /// Creates a rewriter for `config`.
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// The cluster configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Whether statements are rewritten at all.
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Rewrites a possibly multi-statement script.
    ///
    /// With cluster mode disabled the script is returned unchanged. Otherwise
    /// the rewritten statements are joined with `;\n`. `migration_name` is
    /// only used for log correlation.
    pub fn rewrite(&self, sql: &str, migration_name: &str) -> String {
        let Some(cluster) = self.config.cluster_name().filter(|_| self.is_enabled()) else {
            return sql.to_string();
        };

        let rewritten = split_statements(sql)
            .iter()
            .flat_map(|statement| self.rewrite_statement(cluster, statement, migration_name))
            .collect::<Vec<_>>()
            .join(";\n");

        if rewritten != sql {
            log::debug!(
                "Rewrote SQL for cluster '{}' in migration '{}':\n---\n{}\n---\n{}\n---",
                cluster,
                migration_name,
                sql,
                rewritten
            );
        }
        rewritten
    }

    fn rewrite_statement(&self, cluster: &str, statement: &str, migration_name: &str) -> Vec<String> {
        let (comments, body) = split_leading_comments(statement);

        if body.is_empty() || is_dml(body) || ON_CLUSTER.is_match(body) {
            return vec![statement.to_string()];
        }

        let rewritten = if let Some(parts) = DdlParts::capture(&CREATE_TABLE, body) {
            self.rewrite_create_table(cluster, &parts, migration_name)
        } else if let Some(parts) = DdlParts::capture(&DROP, body) {
            self.rewrite_drop(cluster, &parts)
        } else if let Some(parts) = DdlParts::capture(&CREATE_VIEW, body)
            .or_else(|| DdlParts::capture(&CREATE_DATABASE, body))
            .or_else(|| DdlParts::capture(&ALTER_TABLE, body))
        {
            Some(vec![parts.with_cluster(cluster, parts.rest)])
        } else {
            None
        };

        match rewritten {
            Some(mut statements) => {
                if let Some(first) = statements.first_mut() {
                    first.insert_str(0, comments);
                }
                statements
            }
            None => vec![statement.to_string()],
        }
    }

    fn rewrite_create_table(
        &self,
        cluster: &str,
        parts: &DdlParts<'_>,
        migration_name: &str,
    ) -> Option<Vec<String>> {
        let Some(engine) = ENGINE.captures(parts.rest) else {
            return Some(vec![parts.with_cluster(cluster, parts.rest)]);
        };
        let (Some(whole), Some(engine_name)) = (engine.get(0), engine.get(1)) else {
            return Some(vec![parts.with_cluster(cluster, parts.rest)]);
        };
        let engine_name = engine_name.as_str();
        if !is_unreplicated_merge_tree(engine_name) {
            return Some(vec![parts.with_cluster(cluster, parts.rest)]);
        }

        let Some(database) = parts.database().or_else(|| self.config.default_database()) else {
            log::warn!(
                "Cannot rewrite CREATE TABLE {} in migration '{}': no database qualifier and no database in the DSN",
                parts.name,
                migration_name
            );
            return None;
        };
        let table = unquote(parts.name);

        let coordination = format!("'/clickhouse/tables/{{shard}}/{database}.{table}', '{{replica}}'");
        let original_params = engine
            .get(2)
            .map(|m| m.as_str().trim())
            .map(|p| p.trim_start_matches('(').trim_end_matches(')').trim())
            .unwrap_or("");
        let params = if original_params.is_empty() {
            coordination
        } else {
            format!("{coordination}, {original_params}")
        };

        let rest = format!(
            "{}ENGINE = Replicated{}({}){}",
            &parts.rest[..whole.start()],
            engine_name,
            params,
            &parts.rest[whole.end()..]
        );

        let mut statements = vec![parts.with_cluster(cluster, &rest)];
        if self.config.create_distributed_tables {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS `{database}`.`{table}_distributed` ON CLUSTER '{cluster}' \
                 AS `{database}`.`{table}` \
                 ENGINE = Distributed('{cluster}', '{database}', '{table}', rand())"
            ));
        }
        Some(statements)
    }

    fn rewrite_drop(&self, cluster: &str, parts: &DdlParts<'_>) -> Option<Vec<String>> {
        let mut statements = vec![parts.with_cluster(cluster, parts.rest)];

        let drops_table = parts
            .prefix
            .split_whitespace()
            .nth(1)
            .is_some_and(|kind| kind.eq_ignore_ascii_case("TABLE"));
        if drops_table && self.config.create_distributed_tables {
            match parts.database().or_else(|| self.config.default_database()) {
                Some(database) => statements.push(format!(
                    "DROP TABLE IF EXISTS `{}`.`{}_distributed` ON CLUSTER '{}'",
                    database,
                    unquote(parts.name),
                    cluster
                )),
                None => log::warn!(
                    "Not dropping distributed table of {}: database unknown",
                    parts.name
                ),
            }
        }
        Some(statements)
    }
}

fn is_unreplicated_merge_tree(engine: &str) -> bool {
    let engine = engine.to_ascii_lowercase();
    engine.contains("mergetree") && !engine.starts_with("replicated")
}

fn is_dml(body: &str) -> bool {
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    DML_KEYWORDS.contains(&keyword.as_str())
}

/// Separates leading `--` comment lines from the statement body.
fn split_leading_comments(statement: &str) -> (&str, &str) {
    let mut offset = 0;
    for line in statement.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            offset += line.len();
        } else {
            break;
        }
    }
    (&statement[..offset], statement[offset..].trim_start())
}

/// Splits a script on `;` outside quoted strings, identifiers and `--`
/// comments. Statements are trimmed; empty and comment-only ones are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(open) => {
                current.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == open {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    current.push(c);
                    for next in chars.by_ref() {
                        current.push(next);
                        if next == '\n' {
                            break;
                        }
                    }
                }
                ';' => statements.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }
    statements.push(current);

    statements
        .into_iter()
        .map(|statement| statement.trim().to_string())
        .filter(|statement| !split_leading_comments(statement).1.is_empty())
        .collect()
}
