//! Human-readable record of the tool calls made during one turn.

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCallResult, ToolOutcome};

/// Append-only accumulator of [`ToolCallResult`]s in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceBuilder {
    entries: Vec<ToolCallResult>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: ToolCallResult) {
        self.entries.push(result);
    }

    pub fn entries(&self) -> &[ToolCallResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Markdown list with one block per call: name, parameters, response.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let response = match &entry.outcome {
                ToolOutcome::Rows(rows) => compact_json(rows),
                ToolOutcome::Error(message) => format!("error: {message}"),
            };
            out.push_str("- Function call:\n");
            out.push_str(&format!("   - Function name: ```{}```\n\n", entry.name));
            out.push_str(&format!(
                "   - Function parameters: ```{}```\n\n",
                compact_json(&entry.arguments)
            ));
            out.push_str(&format!("   - API response: ```{response}```\n\n"));
        }
        out
    }
}

fn compact_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_string())
}
