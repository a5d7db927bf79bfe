//! The `Tool` trait and schema-driven argument validation.
//!
//! A tool is a capability record: name, description, JSON Schema, a source
//! tag, and an async `execute`. The registry validates arguments against the
//! schema before dispatching, so execute bodies can trust the top-level
//! shape of what they receive.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use aisbot_core::config::McpTransport;
use aisbot_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Source + MCP binding
// ─────────────────────────────────────────────

/// Where a tool comes from. MCP-sourced tools take the verification-and-call
/// dispatch path; everything else goes straight through the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolSource {
    Local,
    Mcp,
    Skill,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolSource::Local => "local",
            ToolSource::Mcp => "mcp",
            ToolSource::Skill => "skill",
        }
    }
}

/// The remote identity an MCP wrapper tool carries: which server, which
/// remote tool name, over which transport.
#[derive(Clone, Debug)]
pub struct McpBinding {
    pub server: String,
    pub remote_name: String,
    pub transport: McpTransport,
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// A callable capability exposed to the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique registry name (e.g. `"read_file"`, `"math_add"`).
    fn name(&self) -> &str;

    /// Description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters:
    /// `{"type":"object","properties":{…},"required":[…]}`.
    fn parameters(&self) -> Value;

    /// Origin of the tool; defaults to local.
    fn source(&self) -> ToolSource {
        ToolSource::Local
    }

    /// Remote identity for MCP wrappers; `None` for everything else.
    fn mcp_binding(&self) -> Option<McpBinding> {
        None
    }

    /// Run the tool. Errors are caught by the registry and turned into
    /// diagnostic strings for the LLM.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// The schema record sent to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }

    /// Check `params` against [`parameters`](Self::parameters) at top level.
    /// Returns human-readable violations; empty means valid.
    fn validate_params(&self, params: &HashMap<String, Value>) -> Vec<String> {
        validate_against_schema(&self.parameters(), params)
    }
}

// ─────────────────────────────────────────────
// Schema validation
// ─────────────────────────────────────────────

/// Top-level validation of an argument map against a JSON Schema object:
/// required keys present, provided keys declared, primitive types matched.
///
/// Numeric rules: an integer satisfies `number`; a float does not satisfy
/// `integer`; booleans satisfy neither.
pub fn validate_against_schema(schema: &Value, params: &HashMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return errors;
    }
    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !params.contains_key(key) {
                errors.push(format!("Missing required parameter: '{key}'"));
            }
        }
    }

    for (key, value) in params {
        let Some(declared) = properties.get(key) else {
            errors.push(format!("Unknown parameter: '{key}'"));
            continue;
        };
        let Some(expected) = declared.get("type").and_then(Value::as_str) else {
            continue;
        };
        if !type_matches(expected, value) {
            errors.push(format!(
                "Parameter '{key}' must be {expected}, got {}",
                value_type_name(value)
            ));
        }
    }

    errors
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required string param.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}
