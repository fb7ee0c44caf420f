//! Read-only decorator for gateways exposed to untrusted models.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use super::{DatabaseGateway, Row};
use crate::error::SqlTalkError;

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "create", "alter", "drop", "replace", "truncate", "attach",
    "detach", "pragma", "vacuum", "reindex", "analyze", "begin", "commit", "rollback",
    "savepoint", "release",
];

/// Allows only single `SELECT`, `WITH ... SELECT` and `EXPLAIN` statements
/// through to the wrapped gateway.
///
/// A rejected query fails with a [`SqlTalkError::Database`] explaining why,
/// which reaches the model like any other SQL error so it can rewrite the
/// query.
#[derive(Debug)]
pub struct ReadOnlyGateway<G> {
    inner: G,
}

impl<G: DatabaseGateway> ReadOnlyGateway<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> G {
        self.inner
    }
}

impl<G: DatabaseGateway> DatabaseGateway for ReadOnlyGateway<G> {
    fn list_tables(&self) -> Result<Vec<String>, SqlTalkError> {
        self.inner.list_tables()
    }

    fn describe_table(&self, table: &str) -> Result<Vec<Row>, SqlTalkError> {
        self.inner.describe_table(table)
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>, SqlTalkError> {
        if let Err(reason) = validate_read_only_sql(sql) {
            warn!(%reason, "rejected non read-only query");
            return Err(SqlTalkError::Database(format!(
                "query rejected by read-only policy: {reason}"
            )));
        }
        self.inner.run_query(sql)
    }
}

/// Check that `sql` is exactly one read-only statement.
pub fn validate_read_only_sql(sql: &str) -> Result<(), String> {
    let stripped = strip_literals_and_comments(sql);
    let candidate = strip_trailing_semicolons(&stripped);
    if candidate.is_empty() {
        return Err("query is empty".into());
    }
    if candidate.contains(';') {
        return Err("multiple statements are not allowed".into());
    }

    let normalized = candidate.to_ascii_lowercase();
    let tokens: Vec<&str> = normalized
        .split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .filter(|token| !token.is_empty())
        .collect();

    let leading = tokens.first().copied().unwrap_or("unknown");
    if !matches!(leading, "select" | "with" | "explain") {
        return Err(format!(
            "only SELECT, WITH and EXPLAIN statements are allowed, got {}",
            leading.to_ascii_uppercase()
        ));
    }
    if let Some(keyword) = tokens.iter().find(|token| MUTATING_KEYWORDS.contains(*token)) {
        return Err(format!(
            "mutating keyword {} is not allowed",
            keyword.to_ascii_uppercase()
        ));
    }
    Ok(())
}

fn strip_literals_and_comments(sql: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)'(?:[^']|'')*'|"(?:[^"]|"")*"|--[^\n]*|/\*.*?\*/"#)
            .expect("literal/comment pattern is valid")
    });
    pattern
        .replace_all(sql, |caps: &regex::Captures<'_>| {
            // Keep quoted identifiers recognizable as a single token.
            if caps[0].starts_with('"') {
                "ident".to_string()
            } else {
                " ".to_string()
            }
        })
        .into_owned()
}

fn strip_trailing_semicolons(sql: &str) -> &str {
    let mut candidate = sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}
