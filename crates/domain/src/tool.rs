use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition exposed to the agent runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    /// Label of the server that owns the tool.
    pub server: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
}

/// One newline-delimited request read by `toolpool serve`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AgentRequest {
    /// List the merged tool catalogue.
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Report per-server session status.
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    /// Invoke a tool.
    Call {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        tool: String,
        #[serde(default = "empty_object")]
        arguments: Value,
    },
}

impl AgentRequest {
    /// The caller-chosen correlation id, echoed back in the response.
    pub fn id(&self) -> Option<&Value> {
        match self {
            Self::List { id } | Self::Status { id } | Self::Call { id, .. } => id.as_ref(),
        }
    }
}

/// One newline-delimited response written by `toolpool serve`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
