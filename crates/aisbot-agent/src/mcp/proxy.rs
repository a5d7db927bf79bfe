//! The MCP proxy: server table, tool-info cache, and registry integration.
//!
//! The proxy is exposed two ways at once:
//! - one registry tool, `mcp_proxy`, with `summary` and `call` actions
//! - one [`McpRemoteTool`] wrapper per discovered remote tool, registered
//!   under the composite name `<server>_<tool>` with an MCP source tag
//!
//! Discovery failures are isolated per server: one unreachable server
//! leaves the others usable, and a later call against it returns a
//! readable diagnostic. Before any wrapper call the dispatcher re-verifies
//! the server, the remote tool (refreshing an empty cache), and the
//! arguments against the cached schema.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use aisbot_core::config::{McpServerConfig, McpTransport};

use super::client::{HttpSession, McpToolInfo, StdioSession};
use super::config::load_mcp_servers;
use crate::tools::base::{validate_against_schema, McpBinding, Tool, ToolSource};

/// Task-level bound on discovery of one server.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);

// ─────────────────────────────────────────────
// McpProxy
// ─────────────────────────────────────────────

/// Owns the configured servers and the per-server tool-info cache.
pub struct McpProxy {
    servers: BTreeMap<String, McpServerConfig>,
    tool_cache: RwLock<HashMap<String, Vec<McpToolInfo>>>,
    discovery_timeout: Duration,
}

impl McpProxy {
    pub fn new(servers: BTreeMap<String, McpServerConfig>) -> Self {
        Self {
            servers,
            tool_cache: RwLock::new(HashMap::new()),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Load the `mcp_servers` table from a YAML config file.
    pub fn from_config_file(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(load_mcp_servers(path)?))
    }

    /// Override the per-server discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn has_server(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Tools of one server, from the cache or discovered on first touch.
    /// An empty cache entry counts as a miss and triggers a refresh.
    pub async fn tools_for(&self, server: &str) -> Vec<McpToolInfo> {
        {
            let cache = self.tool_cache.read().await;
            if let Some(tools) = cache.get(server) {
                if !tools.is_empty() {
                    return tools.clone();
                }
            }
        }

        let Some(config) = self.servers.get(server) else {
            return Vec::new();
        };
        let tools = self.fetch_tools(server, config).await;
        let mut cache = self.tool_cache.write().await;
        cache.insert(server.to_string(), tools.clone());
        tools
    }

    /// Discover one server's tools. Failures log and return empty so other
    /// servers stay usable.
    async fn fetch_tools(&self, server: &str, config: &McpServerConfig) -> Vec<McpToolInfo> {
        let result = match config.transport {
            McpTransport::Stdio => {
                let command = config.command.clone().unwrap_or_default();
                let args = config.args.clone();
                tokio::time::timeout(self.discovery_timeout, async {
                    let mut session = StdioSession::connect(&command, &args).await?;
                    let tools = session.list_tools().await;
                    session.shutdown().await;
                    tools
                })
                .await
                .unwrap_or_else(|_| {
                    Err(anyhow::anyhow!(
                        "discovery timed out after {:?}",
                        self.discovery_timeout
                    ))
                })
            }
            McpTransport::Http => match config.url.as_deref() {
                Some(url) => async {
                    let mut session = HttpSession::connect(url).await?;
                    session.list_tools().await
                }
                .await,
                None => Err(anyhow::anyhow!("http server has no url configured")),
            },
        };

        match result {
            Ok(tools) => {
                info!(server, tools = tools.len(), "discovered MCP tools");
                tools
            }
            Err(e) => {
                warn!(server, error = %e, "MCP discovery failed");
                Vec::new()
            }
        }
    }

    /// Human-readable rundown of every server and its tools.
    pub async fn summary(&self) -> String {
        let mut sections = Vec::new();
        for (name, config) in &self.servers {
            let mut section = format!("- {name} ({})", config.transport);
            if let Some(description) = &config.description {
                section.push_str(&format!(": {description}"));
            }

            for tool in self.tools_for(name).await {
                section.push_str(&format!("\n    Tool: {}", tool.name));
                if !tool.description.is_empty() {
                    section.push_str(&format!("\n      Description: {}", tool.description));
                }
                section.push_str(&format!("\n      Parameters: {}", tool.parameters));
                if let Some(usage) = &tool.usage {
                    section.push_str(&format!("\n      Common Usage: {usage}"));
                }
            }
            sections.push(section);
        }
        format!("Registered MCP servers & tools:\n{}", sections.join("\n"))
    }

    /// Invoke a remote tool by transport. All failures come back as
    /// diagnostic strings.
    pub async fn call(
        &self,
        server: &str,
        tool_name: &str,
        arguments: &HashMap<String, Value>,
    ) -> String {
        let Some(config) = self.servers.get(server) else {
            return format!(
                "Error: MCP server '{server}' not found. Available servers: {}",
                self.server_names().join(", ")
            );
        };

        match config.transport {
            McpTransport::Stdio => {
                let command = config.command.clone().unwrap_or_default();
                let result = async {
                    let mut session = StdioSession::connect(&command, &config.args).await?;
                    let output = session.call_tool(tool_name, arguments).await;
                    session.shutdown().await;
                    output
                }
                .await;
                result.unwrap_or_else(|e| format!("STDIO MCP error: {e}"))
            }
            McpTransport::Http => match config.url.as_deref() {
                Some(url) => {
                    let result = async {
                        let mut session = HttpSession::connect(url).await?;
                        session.call_tool(tool_name, arguments).await
                    }
                    .await;
                    result.unwrap_or_else(|e| format!("HTTP MCP error: {e}"))
                }
                None => format!("HTTP MCP error: server '{server}' has no url configured"),
            },
        }
    }

    /// The verification-and-call path used for MCP-sourced tool calls:
    /// server exists → remote tool exists (refreshing an empty cache) →
    /// arguments validate against the cached schema → call.
    pub async fn dispatch_verified(
        &self,
        binding: &McpBinding,
        arguments: &HashMap<String, Value>,
    ) -> String {
        if !self.has_server(&binding.server) {
            return format!(
                "Error: MCP server '{}' not found. Available servers: {}",
                binding.server,
                self.server_names().join(", ")
            );
        }

        let tools = self.tools_for(&binding.server).await;
        let Some(info) = tools.iter().find(|t| t.name == binding.remote_name) else {
            let available: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            return format!(
                "Error: Tool '{}' not found on server '{}'. Available tools: {}",
                binding.remote_name,
                binding.server,
                available.join(", ")
            );
        };

        let violations = validate_against_schema(&info.parameters, arguments);
        if !violations.is_empty() {
            return format!(
                "Error: Parameter validation failed for '{}': {}",
                binding.remote_name,
                violations.join("; ")
            );
        }

        debug!(
            server = %binding.server,
            tool = %binding.remote_name,
            "verified MCP dispatch"
        );
        self.call(&binding.server, &binding.remote_name, arguments)
            .await
    }

    /// Discover every server and build registry wrappers named
    /// `<server>_<tool>`.
    pub async fn discover_remote_tools(self: &Arc<Self>) -> Vec<Arc<McpRemoteTool>> {
        let mut wrappers = Vec::new();
        for (server, config) in &self.servers {
            for info in self.tools_for(server).await {
                wrappers.push(Arc::new(McpRemoteTool {
                    name: format!("{server}_{}", info.name),
                    description: info.description.clone(),
                    parameters: info.parameters.clone(),
                    binding: McpBinding {
                        server: server.clone(),
                        remote_name: info.name.clone(),
                        transport: config.transport,
                    },
                    proxy: Arc::clone(self),
                }));
            }
        }
        wrappers
    }
}

// ─────────────────────────────────────────────
// Registry tools
// ─────────────────────────────────────────────

/// The `mcp_proxy` registry tool: `summary` lists everything, `call`
/// invokes any server/tool pair dynamically.
pub struct McpProxyTool {
    proxy: Arc<McpProxy>,
}

impl McpProxyTool {
    pub fn new(proxy: Arc<McpProxy>) -> Arc<Self> {
        Arc::new(Self { proxy })
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        "mcp_proxy"
    }

    fn description(&self) -> &str {
        "Call any configured MCP server/tool dynamically, or get a full summary \
         of available MCP tools with their parameters and usage."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["call", "summary"],
                    "description": "Call a tool, or summarize all servers"
                },
                "server": {
                    "type": "string",
                    "description": "MCP server name (for call)"
                },
                "tool_name": {
                    "type": "string",
                    "description": "Remote tool to call"
                },
                "arguments": {
                    "type": "object",
                    "description": "Arguments for the remote tool"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = params
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match action {
            "summary" => Ok(self.proxy.summary().await),
            "call" => {
                let server = params.get("server").and_then(Value::as_str);
                let tool_name = params.get("tool_name").and_then(Value::as_str);
                let (Some(server), Some(tool_name)) = (server, tool_name) else {
                    return Ok("Error: 'server' and 'tool_name' are required for 'call'".into());
                };
                let arguments: HashMap<String, Value> = params
                    .get("arguments")
                    .and_then(Value::as_object)
                    .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                Ok(self.proxy.call(server, tool_name, &arguments).await)
            }
            other => Ok(format!("Error: Unsupported action '{other}'")),
        }
    }
}

/// One remote tool, registered individually so the LLM can call it by its
/// composite name.
pub struct McpRemoteTool {
    name: String,
    description: String,
    parameters: Value,
    binding: McpBinding,
    proxy: Arc<McpProxy>,
}

#[async_trait]
impl Tool for McpRemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn source(&self) -> ToolSource {
        ToolSource::Mcp
    }

    fn mcp_binding(&self) -> Option<McpBinding> {
        Some(self.binding.clone())
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        Ok(self
            .proxy
            .call(&self.binding.server, &self.binding.remote_name, &params)
            .await)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
