//! The agent loop: consume inbound messages, reason with the LLM, execute
//! tools, publish replies.
//!
//! One message flows through: session load → context build (compressed) →
//! up to `max_iterations` reason-act-observe rounds → two session records →
//! one outbound publish. Messages on the reserved `system` channel carry
//! their origin conversation in `chat_id` and route back to it.
//!
//! Bus polling returns empty about once a second; that gap is where the
//! stop flag is honored. In-flight LLM and tool work always finishes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use aisbot_core::bus::envelope::{InboundMessage, OutboundMessage};
use aisbot_core::bus::queue::MessageBus;
use aisbot_core::config::{CompressionConfig, Config};
use aisbot_core::session::SessionStore;
use aisbot_core::types::{Message, ToolCall};
use aisbot_core::utils;
use aisbot_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::compression::ContextCompressor;
use crate::context::ContextBuilder;
use crate::mcp::config::mcp_config_candidates;
use crate::mcp::proxy::{McpProxy, McpProxyTool};
use crate::subagent::{SubagentManager, SubagentSettings};
use crate::tools::filesystem::{EditFileTool, ListDirTool, PathGuard, ReadFileTool, WriteFileTool};
use crate::tools::message::MessageTool;
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};
use crate::tools::ToolSource;

/// Reason-act iterations per message before the canned fallback.
const DEFAULT_MAX_ITERATIONS: usize = 20;
/// Session history window per LLM call.
const HISTORY_WINDOW: usize = 50;

const FALLBACK_REPLY: &str = "I've completed processing but have no response to give.";
const SYSTEM_FALLBACK_REPLY: &str = "Background task completed.";

// ─────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────

/// Everything the loop needs beyond the bus and the provider.
#[derive(Clone)]
pub struct AgentSettings {
    pub workspace: PathBuf,
    /// Model override; falls back to the provider default.
    pub model: Option<String>,
    pub max_iterations: usize,
    pub request: LlmRequestConfig,
    pub brave_api_key: Option<String>,
    pub exec_timeout: u64,
    pub restrict_to_workspace: bool,
    pub agent_name: String,
    pub compression: CompressionConfig,
    /// Explicit MCP config path; otherwise the standard search runs.
    pub mcp_config: Option<PathBuf>,
}

impl AgentSettings {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        AgentSettings {
            workspace: workspace.into(),
            model: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            request: LlmRequestConfig::default(),
            brave_api_key: None,
            exec_timeout: 60,
            restrict_to_workspace: false,
            agent_name: "aisbot".to_string(),
            compression: CompressionConfig::default(),
            mcp_config: None,
        }
    }

    /// Derive settings from the loaded config.
    pub fn from_config(config: &Config) -> Self {
        let defaults = &config.agents.defaults;
        AgentSettings {
            workspace: utils::expand_home(&defaults.workspace),
            model: Some(defaults.model.clone()),
            max_iterations: defaults.max_tool_iterations,
            request: LlmRequestConfig {
                max_tokens: defaults.max_tokens,
                temperature: defaults.temperature,
            },
            brave_api_key: config.tools.web.brave_api_key.clone(),
            exec_timeout: config.tools.exec.timeout,
            restrict_to_workspace: config.tools.restrict_to_workspace,
            agent_name: "aisbot".to_string(),
            compression: config.tools.compression.clone(),
            mcp_config: None,
        }
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The reason-act-observe driver.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_iterations: usize,
    request: LlmRequestConfig,
    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: SessionStore,
    message_tool: Arc<MessageTool>,
    spawn_tool: Arc<SpawnTool>,
    subagents: Arc<SubagentManager>,
    mcp: Option<Arc<McpProxy>>,
    workspace: PathBuf,
    mcp_config_override: Option<PathBuf>,
    running: AtomicBool,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        settings: AgentSettings,
    ) -> Result<Self> {
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        let sessions = SessionStore::for_workspace(&settings.workspace)?;

        let compressor = Arc::new(ContextCompressor::new(
            provider.clone(),
            settings.compression.clone(),
        ));
        let context = ContextBuilder::new(&settings.workspace, &settings.agent_name)
            .with_compressor(compressor);

        let guard =
            PathGuard::from_restriction(&settings.workspace, settings.restrict_to_workspace);
        let mut tools = ToolRegistry::new();
        tools.register(ReadFileTool::new(guard.clone()));
        tools.register(WriteFileTool::new(guard.clone()));
        tools.register(EditFileTool::new(guard.clone()));
        tools.register(ListDirTool::new(guard));
        tools.register(ExecTool::new(
            settings.workspace.clone(),
            settings.exec_timeout,
            settings.restrict_to_workspace,
        ));
        tools.register(WebSearchTool::new(settings.brave_api_key.clone()));
        tools.register(WebFetchTool::new());

        let message_tool = MessageTool::new(Some(bus.clone()));
        tools.register(message_tool.clone());

        let subagents = Arc::new(SubagentManager::new(
            provider.clone(),
            bus.clone(),
            SubagentSettings {
                workspace: settings.workspace.clone(),
                model: model.clone(),
                brave_api_key: settings.brave_api_key.clone(),
                exec_timeout: settings.exec_timeout,
                restrict_to_workspace: settings.restrict_to_workspace,
                request: settings.request.clone(),
            },
        ));
        let spawn_tool = SpawnTool::new(subagents.clone());
        tools.register(spawn_tool.clone());

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = settings.max_iterations,
            "agent loop initialized"
        );

        Ok(Self {
            bus,
            provider,
            model,
            max_iterations: settings.max_iterations,
            request: settings.request,
            tools,
            context,
            sessions,
            message_tool,
            spawn_tool,
            subagents,
            mcp: None,
            workspace: settings.workspace,
            mcp_config_override: settings.mcp_config,
            running: AtomicBool::new(false),
        })
    }

    /// Discover MCP servers and register their tools. Call once before
    /// [`run`](Self::run); the registry is not written after startup.
    pub async fn initialize(&mut self) -> Result<()> {
        let candidates = match &self.mcp_config_override {
            Some(path) => vec![path.clone()],
            None => mcp_config_candidates(&self.workspace),
        };

        for path in candidates {
            match McpProxy::from_config_file(&path) {
                Ok(proxy) => {
                    let proxy = Arc::new(proxy);
                    self.tools.register(McpProxyTool::new(proxy.clone()));
                    for wrapper in proxy.discover_remote_tools().await {
                        self.tools.register(wrapper);
                    }
                    info!(path = %path.display(), "MCP tools loaded");
                    self.mcp = Some(proxy);
                    break;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping MCP config candidate");
                }
            }
        }
        Ok(())
    }

    /// Poll the bus and process messages until [`stop`](Self::stop).
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("agent loop started, waiting for messages");

        while self.running.load(Ordering::SeqCst) {
            let Some(msg) = self.bus.consume_inbound().await else {
                continue; // poll timeout: the stop-flag checkpoint
            };

            let is_system = msg.channel == "system";
            let outcome = if is_system {
                self.process_system_message(&msg).await
            } else {
                self.process_message(&msg).await.map(Some)
            };

            match outcome {
                Ok(Some(response)) => {
                    if let Err(e) = self.bus.publish_outbound(response).await {
                        error!(error = %e, "failed to publish outbound message");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, session_key = %msg.session_key(), "message processing error");
                    if !is_system {
                        let apology = OutboundMessage::new(
                            &msg.channel,
                            &msg.chat_id,
                            format!("Sorry, I encountered an error: {e}"),
                        );
                        let _ = self.bus.publish_outbound(apology).await;
                    }
                }
            }
        }
        info!("agent loop exiting");
    }

    /// Ask the loop to exit after its current poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // ────────────── Message processing ──────────────

    /// One ordinary message: build context, iterate, commit, reply.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let session_key = msg.session_key();
        info!(
            session_key = %session_key,
            preview = %utils::truncate_string(&msg.content, 80),
            "processing message"
        );

        self.message_tool.set_context(&msg.channel, &msg.chat_id).await;
        self.spawn_tool.set_context(&msg.channel, &msg.chat_id).await;

        let history = self.sessions.get_history(&session_key, HISTORY_WINDOW);
        let tools_summary =
            ContextBuilder::build_tools_summary(&self.tools, &self.undiscovered_servers());
        let (mut messages, stats) = self
            .context
            .build_messages(
                &history,
                &msg.content,
                &msg.media,
                Some(&msg.channel),
                Some(&msg.chat_id),
                Some(&tools_summary),
            )
            .await;
        if let Some(stats) = stats {
            if stats.compressed {
                debug!(
                    original_tokens = stats.original_tokens,
                    final_tokens = stats.final_tokens,
                    "context compressed for turn"
                );
            }
        }

        let content = self
            .run_iterations(&mut messages)
            .await
            .unwrap_or_else(|| FALLBACK_REPLY.to_string());

        self.sessions
            .add_message(&session_key, Message::user(&msg.content));
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, &content))
    }

    /// A `system`-channel message (subagent result). The origin
    /// conversation is parsed from `chat_id` (`channel:chat_id`, with a
    /// `cli` fallback when no separator is present) and the reply routes
    /// there. An empty final reply suppresses the outbound message.
    async fn process_system_message(
        &self,
        msg: &InboundMessage,
    ) -> Result<Option<OutboundMessage>> {
        info!(sender = %msg.sender_id, chat_id = %msg.chat_id, "processing system message");

        let (origin_channel, origin_chat_id) = match msg.chat_id.split_once(':') {
            Some((channel, chat_id)) => (channel.to_string(), chat_id.to_string()),
            None => ("cli".to_string(), msg.chat_id.clone()),
        };
        let session_key = format!("{origin_channel}:{origin_chat_id}");

        self.message_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;
        self.spawn_tool
            .set_context(&origin_channel, &origin_chat_id)
            .await;

        let history = self.sessions.get_history(&session_key, HISTORY_WINDOW);
        let tools_summary =
            ContextBuilder::build_tools_summary(&self.tools, &self.undiscovered_servers());
        let (mut messages, _) = self
            .context
            .build_messages(
                &history,
                &msg.content,
                &[],
                Some(&origin_channel),
                Some(&origin_chat_id),
                Some(&tools_summary),
            )
            .await;

        let content = self
            .run_iterations(&mut messages)
            .await
            .unwrap_or_else(|| SYSTEM_FALLBACK_REPLY.to_string());

        self.sessions.add_message(
            &session_key,
            Message::user(format!("[System: {}] {}", msg.sender_id, msg.content)),
        );
        self.sessions
            .add_message(&session_key, Message::assistant(&content));

        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(OutboundMessage::new(
            &origin_channel,
            &origin_chat_id,
            &content,
        )))
    }

    /// The reason-act-observe cycle. Returns the final assistant content,
    /// or `None` when the iteration bound was hit or the model ended a turn
    /// without content.
    async fn run_iterations(&self, messages: &mut Vec<Message>) -> Option<String> {
        let tool_defs = self.tools.get_definitions();

        for iteration in 0..self.max_iterations {
            debug!(iteration, "LLM call");
            let response = self
                .provider
                .chat(messages, Some(&tool_defs), &self.model, &self.request)
                .await;

            if !response.has_tool_calls() {
                return response.content;
            }

            ContextBuilder::add_assistant_message(
                messages,
                response.content.clone(),
                response.tool_calls.clone(),
            );
            for call in &response.tool_calls {
                info!(tool = %call.function.name, iteration, "executing tool call");
                let result = self.dispatch_tool_call(call).await;
                let result = self.context.compress_tool_result(result).await;
                debug!(tool = %call.function.name, result_len = result.len(), "tool result");
                ContextBuilder::add_tool_result(messages, &call.id, &result);
            }
        }
        None
    }

    /// Route one tool call: MCP-sourced tools go through the proxy's
    /// verification path, everything else through the registry.
    async fn dispatch_tool_call(&self, call: &ToolCall) -> String {
        let params = call.parsed_arguments();
        let name = &call.function.name;

        let binding = self
            .tools
            .get(name)
            .filter(|tool| tool.source() == ToolSource::Mcp)
            .and_then(|tool| tool.mcp_binding());

        match (binding, &self.mcp) {
            (Some(binding), Some(proxy)) => proxy.dispatch_verified(&binding, &params).await,
            _ => self.tools.execute(name, params).await,
        }
    }

    /// Configured MCP servers with no registered tools (discovery failed or
    /// pending); surfaced as a hint in the tools summary.
    fn undiscovered_servers(&self) -> Vec<String> {
        let Some(proxy) = &self.mcp else {
            return Vec::new();
        };
        proxy
            .server_names()
            .into_iter()
            .filter(|server| {
                !self.tools.iter().any(|tool| {
                    tool.mcp_binding()
                        .map(|binding| &binding.server == server)
                        .unwrap_or(false)
                })
            })
            .collect()
    }

    // ────────────── Direct entry ──────────────

    /// CLI path: wrap text as a `cli` message and process it inline.
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let msg = InboundMessage::new("cli", "user", "direct", text);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagents
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
