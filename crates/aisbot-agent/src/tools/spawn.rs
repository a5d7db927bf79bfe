//! Subagent delegation tool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::base::{optional_string, require_string, Tool};
use crate::subagent::SubagentManager;

/// Hands tasks to the subagent manager. The agent loop refreshes the origin
/// context before each interaction so results route back to the right
/// conversation.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            context: Mutex::new(("cli".to_string(), "direct".to_string())),
        })
    }

    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a subagent for a complex or long-running task that can proceed in \
         the background. The subagent reports back when it finishes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to complete"
                },
                "label": {
                    "type": "string",
                    "description": "Short display label (optional)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let task = require_string(&params, "task")?;
        let label = optional_string(&params, "label");

        let (origin_channel, origin_chat_id) = self.context.lock().await.clone();
        Ok(self
            .manager
            .spawn(task, label, origin_channel, origin_chat_id)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subagent::SubagentSettings;
    use aisbot_core::bus::dds::DdsProvider;
    use aisbot_core::bus::queue::MessageBus;
    use aisbot_core::types::{LlmResponse, Message, ToolDefinition};
    use aisbot_providers::traits::{LlmProvider, LlmRequestConfig};

    struct StubProvider;

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> LlmResponse {
            LlmResponse {
                content: Some("done".into()),
                ..Default::default()
            }
        }
        fn default_model(&self) -> &str {
            "stub"
        }
        fn display_name(&self) -> &str {
            "Stub"
        }
    }

    async fn spawn_tool(domain: u32) -> Arc<SpawnTool> {
        let bus = Arc::new(MessageBus::new(Arc::new(DdsProvider::new(domain))));
        bus.initialize().await.unwrap();
        let manager = Arc::new(SubagentManager::new(
            Arc::new(StubProvider),
            bus,
            SubagentSettings {
                workspace: std::env::temp_dir(),
                model: "stub".into(),
                brave_api_key: None,
                exec_timeout: 30,
                restrict_to_workspace: false,
                request: LlmRequestConfig::default(),
            },
        ));
        SpawnTool::new(manager)
    }

    #[tokio::test]
    async fn schema_requires_task_only() {
        let tool = spawn_tool(860).await;
        let params = tool.parameters();
        let required = params["required"].as_array().unwrap();
        assert_eq!(required.as_slice(), [json!("task")]);
        assert!(params["properties"]["label"].is_object());
    }

    #[tokio::test]
    async fn execute_confirms_start() {
        let tool = spawn_tool(861).await;
        tool.set_context("discord", "g1").await;

        let mut params = HashMap::new();
        params.insert("task".to_string(), json!("summarize the repo"));
        params.insert("label".to_string(), json!("summary"));
        let result = tool.execute(params).await.unwrap();
        assert!(result.contains("Subagent [summary] started"));
    }

    #[tokio::test]
    async fn missing_task_errors() {
        let tool = spawn_tool(862).await;
        assert!(tool.execute(HashMap::new()).await.is_err());
    }
}
