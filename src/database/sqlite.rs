//! SQLite gateway backed by `rusqlite`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine as _;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use super::{DatabaseGateway, GatewayFactory, ReadOnlyGateway, Row};
use crate::error::SqlTalkError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A single SQLite connection shared by every tool call of a session.
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    label: String,
}

impl SqliteGateway {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqlTalkError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            SqlTalkError::Database(format!("cannot open {}: {e}", path.display()))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(path = %path.display(), "opened sqlite database");
        Ok(Self {
            conn: Mutex::new(conn),
            label: path.display().to_string(),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, SqlTalkError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            label: ":memory:".to_string(),
        }
    }

    /// Where this gateway points, for logs and the CLI banner.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, SqlTalkError> {
        self.conn
            .lock()
            .map_err(|_| SqlTalkError::Database("connection lock poisoned".into()))
    }
}

impl std::fmt::Debug for SqliteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGateway")
            .field("label", &self.label)
            .finish()
    }
}

impl DatabaseGateway for SqliteGateway {
    fn list_tables(&self) -> Result<Vec<String>, SqlTalkError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn describe_table(&self, table: &str) -> Result<Vec<Row>, SqlTalkError> {
        let conn = self.connection()?;
        collect_rows(&conn, &format!("PRAGMA table_info({})", single_quoted(table)))
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>, SqlTalkError> {
        let conn = self.connection()?;
        collect_rows(&conn, sql)
    }
}

/// Run one statement and gather its output as ordered rows.
///
/// Statements without result columns report the number of affected rows.
/// `sqlite3_changes` is left over from the last DML statement after DDL or
/// transaction control, so it only counts when the total moved.
fn collect_rows(conn: &Connection, sql: &str) -> Result<Vec<Row>, SqlTalkError> {
    let mut stmt = conn.prepare(sql)?;

    if stmt.column_count() == 0 {
        let before = total_changes(conn)?;
        let reported = stmt.execute([])?;
        let affected = if total_changes(conn)? == before {
            0
        } else {
            reported
        };
        let mut row = Row::new();
        row.insert("rows_affected".into(), Value::from(affected));
        return Ok(vec![row]);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut mapped = Row::new();
        for (idx, column) in columns.iter().enumerate() {
            let value: SqlValue = row.get(idx)?;
            mapped.insert(column.clone(), sql_to_json(value));
        }
        out.push(mapped);
    }
    Ok(out)
}

fn total_changes(conn: &Connection) -> Result<i64, SqlTalkError> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get::<_, i64>(0))?)
}

fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::from(n),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

fn single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Opens a new [`SqliteGateway`] on the same file for each session.
#[derive(Debug, Clone)]
pub struct SqliteGatewayFactory {
    path: PathBuf,
    read_only: bool,
}

impl SqliteGatewayFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
        }
    }

    /// Wrap every opened gateway in [`ReadOnlyGateway`].
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GatewayFactory for SqliteGatewayFactory {
    fn open(&self) -> Result<Box<dyn DatabaseGateway>, SqlTalkError> {
        let gateway = SqliteGateway::open(&self.path)?;
        if self.read_only {
            Ok(Box::new(ReadOnlyGateway::new(gateway)))
        } else {
            Ok(Box::new(gateway))
        }
    }
}
