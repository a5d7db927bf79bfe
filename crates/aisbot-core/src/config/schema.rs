//! Typed configuration schema.
//!
//! The config file is YAML with snake_case keys:
//!
//! ```yaml
//! bus:
//!   provider: dds          # dds | zenoh
//!   domain_id: 0
//! agents:
//!   defaults:
//!     workspace: ~/.aisbot/workspace
//!     model: deepseek-chat
//! tools:
//!   restrict_to_workspace: true
//!   exec:
//!     timeout: 60
//!   compression:
//!     strategy: truncation
//! mcp_servers:
//!   math:
//!     transport: stdio
//!     command: math-server
//!     args: ["--stdio"]
//! providers:
//!   deepseek:
//!     api_key: sk-...
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ─────────────────────────────────────────────
// Root
// ─────────────────────────────────────────────

/// Root configuration. Every section has working defaults so an absent or
/// partial file still yields a runnable config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
    /// External MCP servers, keyed by server name.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

// ─────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────

/// Transport fabric selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// `"dds"` or `"zenoh"`.
    pub provider: String,
    /// Topic-isolation domain for the dds provider.
    pub domain_id: u32,
    /// Opaque session config map for the zenoh provider.
    pub zenoh_config: serde_json::Value,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            provider: "dds".to_string(),
            domain_id: 0,
            zenoh_config: serde_json::Value::Null,
        }
    }
}

// ─────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

/// Default agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Workspace directory (bootstrap files, memory, skills, sessions).
    pub workspace: String,
    /// Default model identifier.
    pub model: String,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Reason-act iterations before the canned fallback reply.
    pub max_tool_iterations: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        AgentDefaults {
            workspace: "~/.aisbot/workspace".to_string(),
            model: "deepseek-chat".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
        }
    }
}

// ─────────────────────────────────────────────
// LLM providers
// ─────────────────────────────────────────────

/// Credentials for one LLM backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openrouter: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
    pub deepseek: ProviderConfig,
    pub groq: ProviderConfig,
    pub vllm: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get_by_name(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "openrouter" => Some(&self.openrouter),
            "anthropic" => Some(&self.anthropic),
            "openai" => Some(&self.openai),
            "deepseek" => Some(&self.deepseek),
            "groq" => Some(&self.groq),
            "vllm" => Some(&self.vllm),
            _ => None,
        }
    }

    /// Flatten to a name→config map for the provider matcher.
    pub fn to_map(&self) -> HashMap<String, ProviderConfig> {
        let entries: [(&str, &ProviderConfig); 6] = [
            ("openrouter", &self.openrouter),
            ("anthropic", &self.anthropic),
            ("openai", &self.openai),
            ("deepseek", &self.deepseek),
            ("groq", &self.groq),
            ("vllm", &self.vllm),
        ];
        entries
            .into_iter()
            .map(|(name, config)| (name.to_string(), config.clone()))
            .collect()
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// When true, filesystem and exec tools refuse paths outside the
    /// workspace.
    pub restrict_to_workspace: bool,
    pub exec: ExecConfig,
    pub web: WebConfig,
    pub compression: CompressionConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Shell command timeout in seconds.
    pub timeout: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig { timeout: 60 }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Brave Search API key for the `web_search` tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brave_api_key: Option<String>,
}

/// Context compression knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Hard ceiling before compression is considered urgent.
    pub max_context_tokens: usize,
    /// Compression aims to land at or under this.
    pub target_context_tokens: usize,
    /// Trailing non-system messages kept verbatim.
    pub recent_messages_keep: usize,
    /// History length beyond which compression starts paying off.
    pub history_compression_threshold: usize,
    /// `"summary"`, `"truncation"`, or `"semantic"`.
    pub strategy: String,
    /// Minimum content length (chars) for a message to be rewritten.
    pub min_content_length: usize,
    /// Cache the assembled system prompt keyed by its source material.
    pub preserve_system_prompt_cache: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            enabled: true,
            max_context_tokens: 16_000,
            target_context_tokens: 12_000,
            recent_messages_keep: 10,
            history_compression_threshold: 20,
            strategy: "semantic".to_string(),
            min_content_length: 200,
            preserve_system_prompt_cache: true,
        }
    }
}

// ─────────────────────────────────────────────
// MCP servers
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    Stdio,
    Http,
}

impl std::fmt::Display for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpTransport::Stdio => write!(f, "stdio"),
            McpTransport::Http => write!(f, "http"),
        }
    }
}

/// One external MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerConfig {
    pub transport: McpTransport,
    /// Executable for stdio servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for stdio servers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Streaming endpoint for http servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        McpServerConfig {
            transport: McpTransport::Stdio,
            command: None,
            args: Vec::new(),
            url: None,
            description: None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
