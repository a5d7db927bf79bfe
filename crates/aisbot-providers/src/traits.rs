//! The LLM provider contract.

use async_trait::async_trait;

use aisbot_core::types::{LlmResponse, Message, ToolDefinition};

/// Per-call generation settings.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// An LLM backend. The runtime holds exactly one and calls `chat` in a loop.
///
/// Providers never propagate transport errors: a failed call yields
/// `LlmResponse::error(…)`, whose content surfaces as the turn's reply and
/// breaks the reasoning loop cleanly.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse;

    /// The model used when the caller passes no explicit one.
    fn default_model(&self) -> &str;

    /// Name for logs.
    fn display_name(&self) -> &str;
}
