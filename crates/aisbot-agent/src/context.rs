//! Context assembly: the system prompt and the per-turn message array.
//!
//! The system prompt is built from, in order: the identity header, any
//! bootstrap files present in the workspace root, a tools summary, the
//! memory section, always-active skills in full, and an index of the
//! remaining skills. Sections are joined by horizontal rules. The finished
//! message array is handed to the compressor when one is attached.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use tracing::debug;

use aisbot_core::types::{ContentPart, ImageUrl, Message, ToolCall};

use crate::compression::{CompressionStats, ContextCompressor};
use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;
use crate::tools::registry::ToolRegistry;
use crate::tools::ToolSource;

/// Files injected verbatim into the system prompt when present in the
/// workspace root.
const BOOTSTRAP_FILES: [&str; 5] = ["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

/// Separator between system prompt sections.
const SECTION_SEPARATOR: &str = "\n\n---\n\n";

// ─────────────────────────────────────────────
// ContextBuilder
// ─────────────────────────────────────────────

/// Builds system prompts and LLM message arrays.
pub struct ContextBuilder {
    workspace: PathBuf,
    agent_name: String,
    memory: MemoryStore,
    skills: SkillsLoader,
    compressor: Option<std::sync::Arc<ContextCompressor>>,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        let workspace = workspace.into();
        let memory = MemoryStore::new(&workspace);
        let skills = SkillsLoader::new(&workspace, None);
        Self {
            workspace,
            agent_name: agent_name.into(),
            memory,
            skills,
            compressor: None,
        }
    }

    /// Add a built-in skills directory.
    pub fn with_builtin_skills(mut self, path: PathBuf) -> Self {
        self.skills = SkillsLoader::new(&self.workspace, Some(path));
        self
    }

    /// Attach the context compressor.
    pub fn with_compressor(mut self, compressor: std::sync::Arc<ContextCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn skills(&self) -> &SkillsLoader {
        &self.skills
    }

    // ────────────── System prompt ──────────────

    /// Assemble the full system prompt.
    pub fn build_system_prompt(&self, tools_summary: Option<&str>) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut sources: BTreeMap<String, String> = BTreeMap::new();

        let identity = self.build_identity();
        sources.insert("identity".into(), identity.clone());
        parts.push(identity);

        if let Some(bootstrap) = self.load_bootstrap_files() {
            sources.insert("bootstrap".into(), bootstrap.clone());
            parts.push(bootstrap);
        }

        if let Some(summary) = tools_summary {
            if !summary.is_empty() {
                sources.insert("tools".into(), summary.to_string());
                parts.push(summary.to_string());
            }
        }

        if let Some(memory) = self.memory.get_memory_context() {
            let section = format!("# Memory\n\n{memory}");
            sources.insert("memory".into(), memory);
            parts.push(section);
        }

        let always = self.skills.get_always_skills();
        if !always.is_empty() {
            let content = self.skills.load_skills_for_context(&always);
            if !content.is_empty() {
                sources.insert("always_skills".into(), content.clone());
                parts.push(format!("# Active Skills\n\n{content}"));
            }
        }

        let index = self.skills.build_skills_summary();
        if !index.is_empty() {
            sources.insert("skills_summary".into(), index.clone());
            parts.push(format!(
                "# Skills\n\n\
                 The following skills extend your capabilities. To use one, read its \
                 SKILL.md file with the read_file tool.\n\
                 Skills with available=\"false\" need their dependencies installed first.\n\n\
                 {index}"
            ));
        }

        let prompt = parts.join(SECTION_SEPARATOR);
        match &self.compressor {
            Some(compressor) => compressor.compress_system_prompt(&prompt, &sources),
            None => prompt,
        }
    }

    /// The identity header: who the agent is, when and where it runs, and
    /// its ground rules.
    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let platform = format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH);
        let workspace = self.workspace.display();
        let memory_file = self.memory.memory_file().display();

        format!(
            "# {name}\n\n\
             You are {name}, a helpful AI assistant with access to tools: reading, \
             writing and editing files, running shell commands, searching and \
             fetching the web, messaging chat channels, and spawning subagents for \
             background work.\n\n\
             ## Current Time\n{now}\n\n\
             ## Runtime\n{platform}\n\n\
             ## Workspace\n\
             Your workspace is at: {workspace}\n\
             - Long-term memory: {memory_file}\n\
             - Daily notes: {workspace}/memory/YYYY-MM-DD.md\n\
             - Custom skills: {workspace}/skills/<name>/SKILL.md\n\n\
             ## Rules\n\
             - Reply to direct questions with plain text; use the message tool only \
             to reach a specific chat channel.\n\
             - Prefer using tools over guessing.\n\
             - When you learn something worth keeping, write it to the long-term \
             memory file.\n\
             - Be helpful, accurate, and concise.",
            name = self.agent_name,
        )
    }

    fn load_bootstrap_files(&self) -> Option<String> {
        let mut parts = Vec::new();
        for filename in BOOTSTRAP_FILES {
            let path = self.workspace.join(filename);
            if let Ok(content) = std::fs::read_to_string(&path) {
                debug!(file = filename, "loaded bootstrap file");
                parts.push(format!("## {filename}\n\n{content}"));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Summary of available tools grouped by source, for the system prompt.
    /// `undiscovered_servers` lists configured MCP servers whose tools have
    /// not been fetched yet.
    pub fn build_tools_summary(
        registry: &ToolRegistry,
        undiscovered_servers: &[String],
    ) -> String {
        let mut local = Vec::new();
        let mut skill = Vec::new();
        let mut mcp: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for tool in registry.iter() {
            let line = format!("- **{}**: {}", tool.name(), tool.description());
            match tool.source() {
                ToolSource::Local => local.push(line),
                ToolSource::Skill => skill.push(line),
                ToolSource::Mcp => {
                    let server = tool
                        .mcp_binding()
                        .map(|b| b.server)
                        .unwrap_or_else(|| "unknown".to_string());
                    mcp.entry(server).or_default().push(line);
                }
            }
        }
        local.sort();
        skill.sort();

        let mut parts = vec!["# Available Tools".to_string()];
        if !local.is_empty() {
            parts.push(format!("## Local Tools\n{}", local.join("\n")));
        }
        if !mcp.is_empty() || !undiscovered_servers.is_empty() {
            let mut section = String::from("## MCP Tools");
            for (server, mut lines) in mcp {
                lines.sort();
                section.push_str(&format!("\n### {server}\n{}", lines.join("\n")));
            }
            if !undiscovered_servers.is_empty() {
                section.push_str(&format!(
                    "\nServers configured but not yet discovered: {}. \
                     Use mcp_proxy with action='summary' to list their tools.",
                    undiscovered_servers.join(", ")
                ));
            }
            parts.push(section);
        }
        if !skill.is_empty() {
            parts.push(format!("## Skill Tools\n{}", skill.join("\n")));
        }
        parts.join("\n\n")
    }

    // ────────────── Message building ──────────────

    /// Assemble the LLM message array: system prompt (with session info when
    /// known), history, then the new user turn; finally run the compressor.
    pub async fn build_messages(
        &self,
        history: &[Message],
        current_message: &str,
        media: &[String],
        channel: Option<&str>,
        chat_id: Option<&str>,
        tools_summary: Option<&str>,
    ) -> (Vec<Message>, Option<CompressionStats>) {
        let mut system = self.build_system_prompt(tools_summary);
        if let (Some(channel), Some(chat_id)) = (channel, chat_id) {
            system.push_str(&format!(
                "\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
            ));
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend_from_slice(history);
        messages.push(build_user_content(current_message, media));

        match &self.compressor {
            Some(compressor) => {
                let (compacted, stats) = compressor.compress_messages(&messages).await;
                (compacted, Some(stats))
            }
            None => (messages, None),
        }
    }

    /// Append an assistant turn, with or without tool calls.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::assistant(text));
            }
        } else {
            messages.push(Message::assistant_tool_calls(content, tool_calls));
        }
    }

    /// Append a tool result turn.
    pub fn add_tool_result(messages: &mut Vec<Message>, tool_call_id: &str, result: &str) {
        messages.push(Message::tool_result(tool_call_id, result));
    }

    /// Compact an oversized tool result through the attached compressor.
    pub async fn compress_tool_result(&self, result: String) -> String {
        match &self.compressor {
            Some(compressor) => compressor.compress_tool_result(&result).await,
            None => result,
        }
    }
}

// ─────────────────────────────────────────────
// Multimodal user content
// ─────────────────────────────────────────────

/// Build the user turn: plain text, or image parts followed by one text
/// part when readable image files are attached.
fn build_user_content(text: &str, media: &[String]) -> Message {
    let mut parts = Vec::new();
    for path in media {
        let Some(mime) = image_mime(path) else {
            continue;
        };
        let Ok(data) = std::fs::read(path) else {
            continue;
        };
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{mime};base64,{}", BASE64.encode(&data)),
            },
        });
    }

    if parts.is_empty() {
        return Message::user(text);
    }
    parts.push(ContentPart::Text {
        text: text.to_string(),
    });
    Message::user_parts(parts)
}

/// Image MIME type by extension; `None` for non-images.
fn image_mime(path: &str) -> Option<&'static str> {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        Some("image/png")
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        Some("image/jpeg")
    } else if lower.ends_with(".gif") {
        Some("image/gif")
    } else if lower.ends_with(".webp") {
        Some("image/webp")
    } else {
        None
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
