//! MCP (Model Context Protocol) integration.
//!
//! - [`config`]: server table loading and the config search path
//! - [`client`]: JSON-RPC sessions over subprocess stdio and streaming HTTP
//! - [`proxy`]: the dynamic proxy tool, per-server tool cache, and the
//!   individually registered remote-tool wrappers

pub mod client;
pub mod config;
pub mod proxy;

pub use client::McpToolInfo;
pub use config::{load_mcp_servers, mcp_config_candidates};
pub use proxy::{McpProxy, McpProxyTool, McpRemoteTool};
