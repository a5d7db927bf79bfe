//! Background subagents.
//!
//! The main agent delegates self-contained work through the `spawn` tool.
//! Each subagent runs as its own tokio task with a task-focused system
//! prompt, a restricted tool registry (no `message`, no `spawn`, no
//! `edit_file`), and an ephemeral message history. When it finishes, the
//! result is announced on the bus as an inbound message on the reserved
//! `system` channel, with the origin conversation encoded in `chat_id`; the
//! agent loop picks that up and routes its summary back to the user.
//!
//! The manager holds the bus and the provider, never the loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use aisbot_core::bus::envelope::InboundMessage;
use aisbot_core::bus::queue::MessageBus;
use aisbot_core::types::Message;
use aisbot_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::context::ContextBuilder;
use crate::tools::filesystem::{ListDirTool, PathGuard, ReadFileTool, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Iteration bound for one subagent task.
const SUBAGENT_MAX_ITERATIONS: usize = 15;

/// Metadata about one running task.
#[derive(Clone, Debug)]
pub struct TaskInfo {
    pub id: String,
    pub label: String,
    pub task: String,
    pub origin_channel: String,
    pub origin_chat_id: String,
}

/// Shared settings the manager needs to build a subagent's toolset.
#[derive(Clone)]
pub struct SubagentSettings {
    pub workspace: PathBuf,
    pub model: String,
    pub brave_api_key: Option<String>,
    pub exec_timeout: u64,
    pub restrict_to_workspace: bool,
    pub request: LlmRequestConfig,
}

// ─────────────────────────────────────────────
// SubagentManager
// ─────────────────────────────────────────────

/// Spawns and tracks background subagent tasks.
pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    bus: Arc<MessageBus>,
    settings: SubagentSettings,
    running_tasks: RwLock<HashMap<String, TaskInfo>>,
}

impl SubagentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        bus: Arc<MessageBus>,
        settings: SubagentSettings,
    ) -> Self {
        Self {
            provider,
            bus,
            settings,
            running_tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Start a task in the background; returns an immediate confirmation for
    /// the LLM.
    pub async fn spawn(
        self: &Arc<Self>,
        task: String,
        label: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
    ) -> String {
        let task_id = new_task_id();
        let label =
            label.unwrap_or_else(|| aisbot_core::utils::truncate_string(&task, 30));

        let info = TaskInfo {
            id: task_id.clone(),
            label: label.clone(),
            task: task.clone(),
            origin_channel: origin_channel.clone(),
            origin_chat_id: origin_chat_id.clone(),
        };
        {
            let mut tasks = self.running_tasks.write().await;
            tasks.insert(task_id.clone(), info);
        }

        let manager = Arc::clone(self);
        let id = task_id.clone();
        let display = label.clone();
        tokio::spawn(async move {
            let result = manager.run_subagent(&id, &task).await;
            let body = match result {
                Ok(text) => text,
                Err(e) => {
                    error!(task_id = %id, error = %e, "subagent task failed");
                    format!("Task failed: {e}")
                }
            };
            manager
                .announce_result(&id, &display, &body, &origin_channel, &origin_chat_id)
                .await;

            let mut tasks = manager.running_tasks.write().await;
            tasks.remove(&id);
            debug!(task_id = %id, "subagent task cleaned up");
        });

        format!("Subagent [{label}] started (id: {task_id}). I'll report back when it completes.")
    }

    /// The subagent's own reason-act loop with a restricted toolset.
    async fn run_subagent(&self, task_id: &str, task: &str) -> anyhow::Result<String> {
        info!(task_id, "subagent starting");

        let guard = PathGuard::from_restriction(
            &self.settings.workspace,
            self.settings.restrict_to_workspace,
        );
        let mut tools = ToolRegistry::new();
        tools.register(ReadFileTool::new(guard.clone()));
        tools.register(WriteFileTool::new(guard.clone()));
        tools.register(ListDirTool::new(guard));
        tools.register(ExecTool::new(
            self.settings.workspace.clone(),
            self.settings.exec_timeout,
            self.settings.restrict_to_workspace,
        ));
        tools.register(WebSearchTool::new(self.settings.brave_api_key.clone()));
        tools.register(WebFetchTool::new());

        let mut messages = vec![
            Message::system(self.build_subagent_prompt(task)),
            Message::user(task),
        ];
        let tool_defs = tools.get_definitions();
        let mut final_content: Option<String> = None;

        for iteration in 0..SUBAGENT_MAX_ITERATIONS {
            debug!(task_id, iteration, "subagent LLM call");

            let response = self
                .provider
                .chat(
                    &messages,
                    Some(&tool_defs),
                    &self.settings.model,
                    &self.settings.request,
                )
                .await;

            if response.has_tool_calls() {
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    response.tool_calls.clone(),
                );
                for call in &response.tool_calls {
                    info!(task_id, tool = %call.function.name, "subagent tool call");
                    let result = tools
                        .execute(&call.function.name, call.parsed_arguments())
                        .await;
                    ContextBuilder::add_tool_result(&mut messages, &call.id, &result);
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        let result = final_content
            .unwrap_or_else(|| "Subagent completed processing but produced no output.".into());
        info!(task_id, result_len = result.len(), "subagent finished");
        Ok(result)
    }

    /// Publish the result on the `system` channel, addressed back to the
    /// origin conversation.
    async fn announce_result(
        &self,
        task_id: &str,
        label: &str,
        result: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) {
        let content = format!(
            "## Subagent Result\n\
             **Task**: {label}\n\n\
             {result}\n\n\
             ---\n\
             *Summarize this naturally for the user. Keep it brief. \
             Do not mention 'subagent' or task IDs.*"
        );
        let msg = InboundMessage::new(
            "system",
            "subagent",
            format!("{origin_channel}:{origin_chat_id}"),
            content,
        );

        info!(task_id, "announcing subagent result");
        if let Err(e) = self.bus.publish_inbound(msg).await {
            error!(task_id, error = %e, "failed to announce subagent result");
        }
    }

    fn build_subagent_prompt(&self, task: &str) -> String {
        format!(
            "# Subagent\n\
             You are a subagent spawned to complete one specific task.\n\n\
             ## Your Task\n\
             {task}\n\n\
             ## Rules\n\
             1. Stay focused on the assigned task\n\
             2. Your final response is reported back to the main agent\n\
             3. Do not start conversations or take on side work\n\
             4. Be concise but complete\n\n\
             ## Available\n\
             - Read and write files, list directories\n\
             - Run shell commands\n\
             - Search the web and fetch pages\n\n\
             ## Not Available\n\
             - Messaging users directly\n\
             - Spawning further subagents\n\
             - In-place file edits (overwrite with write_file instead)\n\n\
             ## Workspace\n\
             {workspace}",
            workspace = self.settings.workspace.display()
        )
    }

    pub async fn running_tasks(&self) -> Vec<TaskInfo> {
        self.running_tasks.read().await.values().cloned().collect()
    }

    pub async fn task_count(&self) -> usize {
        self.running_tasks.read().await.len()
    }
}

/// Short task id: the first eight hex chars of a v4 uuid.
fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
