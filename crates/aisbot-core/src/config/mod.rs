//! Configuration — YAML schema and loader.

pub mod loader;
pub mod schema;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AgentDefaults, AgentsConfig, BusConfig, CompressionConfig, Config, ExecConfig,
    McpServerConfig, McpTransport, ProviderConfig, ProvidersConfig, ToolsConfig, WebConfig,
};
