//! Proactive outbound messaging tool.
//!
//! Lets the agent push a message to a channel mid-turn (progress updates,
//! messages to a different chat). The agent loop refreshes the default
//! channel/chat context before every interaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use aisbot_core::bus::envelope::OutboundMessage;
use aisbot_core::bus::queue::MessageBus;

use super::base::{optional_string, require_string, Tool};

/// Sends messages onto the outbound bus.
pub struct MessageTool {
    bus: Option<Arc<MessageBus>>,
    /// Default (channel, chat_id), refreshed per interaction.
    context: Mutex<(String, String)>,
}

impl MessageTool {
    /// `bus` may be `None` in direct/test mode; sends become no-ops.
    pub fn new(bus: Option<Arc<MessageBus>>) -> Arc<Self> {
        Arc::new(Self {
            bus,
            context: Mutex::new(("cli".to_string(), "direct".to_string())),
        })
    }

    /// Point the default destination at the current conversation.
    pub async fn set_context(&self, channel: &str, chat_id: &str) {
        let mut ctx = self.context.lock().await;
        *ctx = (channel.to_string(), chat_id.to_string());
    }

    pub async fn current_context(&self) -> (String, String) {
        self.context.lock().await.clone()
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a chat channel. Defaults to the current conversation; \
         pass channel and chat_id to target a different one. For a normal reply, \
         just answer with text instead of calling this tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message text to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Target channel (optional)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat ID (optional)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;

        let (default_channel, default_chat) = self.current_context().await;
        let channel = optional_string(&params, "channel").unwrap_or(default_channel);
        let chat_id = optional_string(&params, "chat_id").unwrap_or(default_chat);

        debug!(channel = %channel, chat_id = %chat_id, "message tool send");

        if let Some(bus) = &self.bus {
            bus.publish_outbound(OutboundMessage::new(&channel, &chat_id, &content))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to send message: {e}"))?;
        } else {
            debug!("no bus attached; message discarded");
        }

        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}
