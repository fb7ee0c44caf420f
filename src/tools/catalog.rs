//! The fixed catalog of database tools and its dispatcher.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{debug, warn};

use super::types::{ParameterBuilder, ToolDeclaration};
use super::validation::validate_arguments;
use crate::database::{DatabaseGateway, Row};
use crate::error::SqlTalkError;
use crate::types::AgentToolCall;

/// The tools the model may call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    ListTables,
    GetTable,
    SqlQuery,
}

impl ToolName {
    fn declaration(self) -> ToolDeclaration {
        match self {
            Self::ListTables => ToolDeclaration::new(
                self.as_ref(),
                "List tables in the SQL database that will help answer the user's question",
                ParameterBuilder::new().build(),
            ),
            Self::GetTable => ToolDeclaration::new(
                self.as_ref(),
                "Get information about a table, including the description, schema, and number \
                 of rows that will help answer the user's question.",
                ParameterBuilder::new()
                    .string(
                        "table_name",
                        "Name of the table to get information about",
                        true,
                    )
                    .build(),
            ),
            Self::SqlQuery => ToolDeclaration::new(
                self.as_ref(),
                "Execute SQL queries on the database to retrieve information that answers the \
                 user's question.",
                ParameterBuilder::new()
                    .string(
                        "query",
                        "SQL query that will be executed on the database.",
                        true,
                    )
                    .build(),
            ),
        }
    }
}

/// A structured action requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id; used to pair the result with the call.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl From<AgentToolCall> for ToolCallRequest {
    fn from(call: AgentToolCall) -> Self {
        Self {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// What a dispatched tool produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Rows(Vec<Row>),
    /// The database rejected the call; the text goes back to the model.
    Error(String),
}

/// One executed tool call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: ToolName,
    pub arguments: serde_json::Value,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    pub fn rows(&self) -> &[Row] {
        match &self.outcome {
            ToolOutcome::Rows(rows) => rows,
            ToolOutcome::Error(_) => &[],
        }
    }

    /// The body handed back to the model as the function response.
    pub fn to_response_payload(&self) -> serde_json::Value {
        match &self.outcome {
            ToolOutcome::Rows(rows) => serde_json::json!({ "content": rows }),
            ToolOutcome::Error(message) => serde_json::json!({ "error": message }),
        }
    }
}

/// Static registry of the database tools.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    declarations: Vec<ToolDeclaration>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    /// The `list_tables` / `get_table` / `sql_query` catalog.
    pub fn new() -> Self {
        Self {
            declarations: ToolName::iter().map(ToolName::declaration).collect(),
        }
    }

    /// Declarations advertised to the model.
    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    /// Check a request's name and arguments against the catalog.
    pub fn resolve(&self, request: &ToolCallRequest) -> Result<ToolName, SqlTalkError> {
        let name = ToolName::from_str(&request.name)
            .map_err(|_| SqlTalkError::tool_dispatch(&request.name, "unknown tool"))?;
        let declaration = self
            .declarations
            .iter()
            .find(|d| d.name == request.name)
            .ok_or_else(|| SqlTalkError::tool_dispatch(&request.name, "tool not in catalog"))?;
        validate_arguments(&request.arguments, &declaration.parameters)
            .map_err(|message| SqlTalkError::tool_dispatch(&request.name, message))?;
        Ok(name)
    }

    /// Execute a request against `gateway`.
    ///
    /// Fails only with [`SqlTalkError::ToolDispatch`]; database failures are
    /// folded into the result so the model can see them and retry.
    pub fn dispatch(
        &self,
        gateway: &dyn DatabaseGateway,
        request: &ToolCallRequest,
    ) -> Result<ToolCallResult, SqlTalkError> {
        let name = self.resolve(request)?;
        debug!(tool = %name, call_id = %request.id, "dispatching tool call");

        let rows = match name {
            ToolName::ListTables => gateway.list_tables().map(|tables| {
                tables
                    .into_iter()
                    .map(|table| {
                        let mut row = Row::new();
                        row.insert("name".into(), serde_json::Value::String(table));
                        row
                    })
                    .collect()
            }),
            ToolName::GetTable => gateway.describe_table(string_arg(request, "table_name")?),
            ToolName::SqlQuery => gateway.run_query(string_arg(request, "query")?),
        };

        let outcome = match rows {
            Ok(rows) => ToolOutcome::Rows(rows),
            Err(SqlTalkError::Database(message)) => {
                warn!(tool = %name, error = %message, "database rejected tool call");
                ToolOutcome::Error(message)
            }
            Err(other) => ToolOutcome::Error(other.to_string()),
        };

        Ok(ToolCallResult {
            call_id: request.id.clone(),
            name,
            arguments: request.arguments.clone(),
            outcome,
        })
    }
}

fn string_arg<'a>(request: &'a ToolCallRequest, key: &str) -> Result<&'a str, SqlTalkError> {
    request
        .arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            SqlTalkError::tool_dispatch(&request.name, format!("missing string argument '{key}'"))
        })
}
