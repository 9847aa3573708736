//! Tool call context types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable descriptor of a single tool invocation.
///
/// Serialized with camelCase keys; condition fields address it as
/// `toolCall.toolName`, `toolCall.parameters.<key>`, and so on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ToolCall {
    /// Create a new tool call descriptor.
    pub fn new(tool_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            agent_id: None,
            session_id: None,
            metadata: None,
        }
    }

    /// Set the agent ID
    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    /// Set the session ID
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Attach additional metadata
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Arguments handed to a protected tool invocation.
///
/// A single structured-object argument is taken as the parameter map
/// itself; anything else is indexed `arg0`, `arg1`, ...
#[derive(Clone, Debug, PartialEq)]
pub enum ToolArguments {
    /// Positional arguments, keyed `arg0`, `arg1`, ... in the parameter map.
    Positional(Vec<Value>),
    /// A single structured object used directly as the parameter map.
    Named(Map<String, Value>),
}

impl ToolArguments {
    /// No arguments at all.
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    /// A named parameter map.
    pub fn named(map: Map<String, Value>) -> Self {
        Self::Named(map)
    }

    /// Build arguments from a positional list, applying the extraction
    /// rule: exactly one object argument becomes the parameter map.
    pub fn from_values(mut values: Vec<Value>) -> Self {
        if values.len() == 1 && values[0].is_object() {
            match values.pop() {
                Some(Value::Object(map)) => return Self::Named(map),
                Some(other) => values.push(other),
                None => {}
            }
        }
        Self::Positional(values)
    }

    /// The parameter map this invocation presents to the evaluator.
    pub fn to_parameters(&self) -> Map<String, Value> {
        match self {
            Self::Named(map) => map.clone(),
            Self::Positional(values) => values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("arg{i}"), v.clone()))
                .collect(),
        }
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self::Named(map)
    }
}
