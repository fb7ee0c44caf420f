//! Tool catalog for function calling against the database.

pub mod catalog;
pub mod types;
pub mod validation;

pub use catalog::{ToolCallRequest, ToolCallResult, ToolCatalog, ToolName, ToolOutcome};
pub use types::{ParameterBuilder, ToolDeclaration};
