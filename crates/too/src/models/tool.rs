use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool, unique within a catalog
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// A JSON schema describing the arguments the tool accepts
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool call requested by the model
///
/// The arguments are always a parsed object; adapters never hand out partial argument text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Vendor correlated id, unique within one response
    pub id: String,
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The recorded outcome of executing a tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success<I: Into<String>, O: Into<String>>(tool_call_id: I, output: O) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error<I: Into<String>, O: Into<String>>(tool_call_id: I, output: O) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            is_error: true,
        }
    }
}
