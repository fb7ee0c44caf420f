//! Database gateway: the narrow capability the conversation loop uses to
//! introspect and query a relational store.
//!
//! The gateway executes whatever SQL it is handed. Deployments that cannot
//! trust the model wrap it in [`ReadOnlyGateway`].

pub mod read_only;
pub mod sqlite;

pub use read_only::ReadOnlyGateway;
pub use sqlite::{SqliteGateway, SqliteGatewayFactory};

use crate::error::SqlTalkError;

/// One result row: column name to value, in select-list order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Synchronous access to a relational store.
///
/// Every failure surfaces as [`SqlTalkError::Database`] carrying the engine's
/// message, never as a panic.
pub trait DatabaseGateway: Send + Sync {
    /// Names of the user tables, in catalog order. Empty when there are none.
    fn list_tables(&self) -> Result<Vec<String>, SqlTalkError>;

    /// Column descriptions for `table`. An unknown table yields no rows.
    fn describe_table(&self, table: &str) -> Result<Vec<Row>, SqlTalkError>;

    /// Execute `sql` verbatim and collect its rows.
    fn run_query(&self, sql: &str) -> Result<Vec<Row>, SqlTalkError>;
}

impl<G: DatabaseGateway + ?Sized> DatabaseGateway for Box<G> {
    fn list_tables(&self) -> Result<Vec<String>, SqlTalkError> {
        (**self).list_tables()
    }

    fn describe_table(&self, table: &str) -> Result<Vec<Row>, SqlTalkError> {
        (**self).describe_table(table)
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>, SqlTalkError> {
        (**self).run_query(sql)
    }
}

/// Opens a fresh gateway per session so SQL state never leaks between them.
pub trait GatewayFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn DatabaseGateway>, SqlTalkError>;
}
