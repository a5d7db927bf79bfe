//! Generic HTTP client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! One implementation covers every supported backend; the registry decides
//! the base URL and credentials. Failures of any kind come back as
//! `LlmResponse::error(…)` so the agent loop always has content to work with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use aisbot_core::config::ProviderConfig;
use aisbot_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmResponse, Message, ToolDefinition,
};

use crate::registry::{find_spec, resolve_model_name, ProviderSpec};
use crate::traits::{LlmProvider, LlmRequestConfig};

/// Request timeout for one completion call.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// OpenAI-compatible chat client for one backend.
pub struct HttpProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    default_model: String,
    spec: &'static ProviderSpec,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("provider", &self.spec.display_name)
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig, spec: &'static ProviderSpec, model: &str) -> Self {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| spec.default_api_base.map(String::from))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        HttpProvider {
            client,
            api_base,
            api_key: config.api_key.clone(),
            default_model: model.to_string(),
            spec,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        model: &str,
        config: &LlmRequestConfig,
    ) -> LlmResponse {
        let resolved_model = resolve_model_name(model, self.spec);

        debug!(
            provider = self.spec.display_name,
            model = %resolved_model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let body = ChatCompletionRequest {
            model: resolved_model,
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let result = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(provider = self.spec.display_name, error = %e, "HTTP request failed");
                return LlmResponse::error(format!("Error calling LLM: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(provider = self.spec.display_name, status = %status, body = %body, "API error");
            return LlmResponse::error(format!("Error calling LLM: {status} — {body}"));
        }

        match response.json::<ChatCompletionResponse>().await {
            Ok(completion) => {
                let llm: LlmResponse = completion.into();
                debug!(
                    provider = self.spec.display_name,
                    has_content = llm.content.is_some(),
                    tool_calls = llm.tool_calls.len(),
                    finish_reason = llm.finish_reason.as_deref().unwrap_or("?"),
                    "LLM response received"
                );
                llm
            }
            Err(e) => {
                error!(provider = self.spec.display_name, error = %e, "unparseable LLM response");
                LlmResponse::error(format!("Error parsing LLM response: {e}"))
            }
        }
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn display_name(&self) -> &str {
        self.spec.display_name
    }
}

// ─────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────

/// Build a provider for `model` from the configured backends.
pub fn create_provider(
    model: &str,
    configs: &HashMap<String, ProviderConfig>,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let (spec, config) = find_spec(model, configs).ok_or_else(|| {
        anyhow::anyhow!(
            "no configured LLM provider matches model '{model}' \
             (set an API key in the providers section or the provider's env var)"
        )
    })?;
    Ok(Arc::new(HttpProvider::new(&config, spec, model)))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpProvider {
        let config = ProviderConfig {
            api_key: "test-key".into(),
            api_base: Some(server.uri()),
        };
        let spec = crate::registry::PROVIDERS
            .iter()
            .find(|s| s.name == "openai")
            .unwrap();
        HttpProvider::new(&config, spec, "gpt-test")
    }

    #[tokio::test]
    async fn plain_text_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"content": "Hello there!"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 3, "total_tokens": 6}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("Hi")],
                None,
                "gpt-test",
                &LlmRequestConfig::default(),
            )
            .await;

        assert_eq!(response.content.as_deref(), Some("Hello there!"));
        assert!(!response.has_tool_calls());
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn tool_calls_are_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_7",
                            "type": "function",
                            "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("read x")],
                None,
                "gpt-test",
                &LlmRequestConfig::default(),
            )
            .await;

        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].function.name, "read_file");
    }

    #[tokio::test]
    async fn tools_request_sets_auto_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let tools = vec![aisbot_core::types::ToolDefinition::new(
            "noop",
            "does nothing",
            json!({"type": "object", "properties": {}}),
        )];
        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("hi")],
                Some(&tools),
                "gpt-test",
                &LlmRequestConfig::default(),
            )
            .await;
        assert_eq!(response.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn http_error_becomes_error_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("hi")],
                None,
                "gpt-test",
                &LlmRequestConfig::default(),
            )
            .await;

        let content = response.content.unwrap();
        assert!(content.starts_with("Error calling LLM"));
        assert!(content.contains("429"));
        assert!(response.finish_reason.is_none());
    }

    #[tokio::test]
    async fn unparseable_body_becomes_error_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let response = provider
            .chat(
                &[Message::user("hi")],
                None,
                "gpt-test",
                &LlmRequestConfig::default(),
            )
            .await;

        assert!(response
            .content
            .unwrap()
            .starts_with("Error parsing LLM response"));
    }

    #[test]
    fn create_provider_requires_a_match() {
        let mut configs = HashMap::new();
        configs.insert(
            "deepseek".to_string(),
            ProviderConfig {
                api_key: "sk-d".into(),
                api_base: None,
            },
        );
        assert!(create_provider("deepseek-chat", &configs).is_ok());
    }
}
