//! aisbot agent plane — the reasoning loop and everything it drives.
//!
//! - **tools**: the `Tool` trait, registry with schema validation, built-ins
//! - **mcp**: config, JSON-RPC client sessions, and the dynamic proxy
//! - **compression**: token-bounded context compaction
//! - **context**: system prompt + message assembly (memory, skills)
//! - **subagent**: background task delegation over the bus
//! - **agent_loop**: the reason-act-observe driver

pub mod agent_loop;
pub mod compression;
pub mod context;
pub mod mcp;
pub mod memory;
pub mod skills;
pub mod subagent;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentSettings};
pub use compression::ContextCompressor;
pub use context::ContextBuilder;
pub use mcp::McpProxy;
pub use memory::MemoryStore;
pub use skills::SkillsLoader;
pub use subagent::SubagentManager;
pub use tools::{Tool, ToolRegistry, ToolSource};
