//! Tool registry: unique-name store with validate-then-dispatch.
//!
//! Every dispatch outcome is a string — unknown tool, failed validation, and
//! execution errors all come back as diagnostics the LLM can read. Nothing
//! raises into the agent loop.

use std::collections::HashMap;
use std::sync::Arc;

use aisbot_core::types::ToolDefinition;
use tracing::{info, warn};

use super::base::Tool;

/// Stores tools keyed by name and dispatches calls.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Names are unique: a duplicate is rejected and the
    /// original kept.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "duplicate tool registration rejected");
            return false;
        }
        info!(tool = %name, source = tool.source().as_str(), "registered tool");
        self.tools.insert(name, tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over the registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// LLM-facing definitions, sorted by name for determinism.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Look up, validate, and execute. Always returns a string.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "tool not found");
            return format!("Unknown tool: {name}");
        };

        let violations = tool.validate_params(&params);
        if !violations.is_empty() {
            warn!(tool = name, ?violations, "argument validation failed");
            return format!(
                "Parameter validation failed for '{name}': {}",
                violations.join("; ")
            );
        }

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool {
        calls: AtomicUsize,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the text"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"}
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("Echo: {}", params["text"].as_str().unwrap()))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(EchoTool::new())));
        assert!(registry.has("echo"));
        assert!(!registry.has("nope"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(EchoTool::new())));
        assert!(!registry.register(Arc::new(EchoTool::new())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailTool));
        registry.register(Arc::new(EchoTool::new()));
        let defs = registry.get_definitions();
        assert_eq!(defs[0].function.name, "echo");
        assert_eq!(defs[1].function.name, "fail");
        assert_eq!(registry.tool_names(), vec!["echo", "fail"]);
    }

    #[tokio::test]
    async fn execute_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new()));
        let mut params = HashMap::new();
        params.insert("text".to_string(), json!("hello"));
        assert_eq!(registry.execute("echo", params).await, "Echo: hello");
    }

    #[tokio::test]
    async fn unknown_tool_diagnostic() {
        let registry = ToolRegistry::new();
        let result = registry.execute("missing", HashMap::new()).await;
        assert_eq!(result, "Unknown tool: missing");
    }

    #[tokio::test]
    async fn invalid_args_never_reach_execute() {
        let echo = Arc::new(EchoTool::new());
        let mut registry = ToolRegistry::new();
        registry.register(echo.clone());

        let mut params = HashMap::new();
        params.insert("text".to_string(), json!(123));
        let result = registry.execute("echo", params).await;

        assert!(result.starts_with("Parameter validation failed for 'echo':"));
        assert!(result.contains("'text'"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execution_errors_become_strings() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailTool));
        let result = registry.execute("fail", HashMap::new()).await;
        assert!(result.starts_with("Error executing fail:"));
        assert!(result.contains("intentional failure"));
    }

    #[tokio::test]
    async fn pure_tool_dispatch_is_repeatable() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new()));
        let mut params = HashMap::new();
        params.insert("text".to_string(), json!("same"));

        let first = registry.execute("echo", params.clone()).await;
        let second = registry.execute("echo", params).await;
        assert_eq!(first, second);
    }
}
