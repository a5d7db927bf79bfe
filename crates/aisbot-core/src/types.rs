//! Chat types in the OpenAI chat-completions format.
//!
//! Every LLM provider speaks this shape, so the whole runtime uses it as the
//! lingua franca: the context builder emits it, the compressor rewrites it,
//! and the session store persists it line by line.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// A chat message, tagged by `role` on the wire.
///
/// The optional `compressed` / `original_length` markers are set by the
/// context compressor when it rewrites an older message; they serialize as
/// `_compressed` / `_original_length` and are absent otherwise.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User {
        content: MessageContent,
        #[serde(rename = "_compressed", skip_serializing_if = "Option::is_none", default)]
        compressed: Option<bool>,
        #[serde(rename = "_original_length", skip_serializing_if = "Option::is_none", default)]
        original_length: Option<usize>,
    },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(rename = "_compressed", skip_serializing_if = "Option::is_none", default)]
        compressed: Option<bool>,
        #[serde(rename = "_original_length", skip_serializing_if = "Option::is_none", default)]
        original_length: Option<usize>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
        #[serde(rename = "_compressed", skip_serializing_if = "Option::is_none", default)]
        compressed: Option<bool>,
        #[serde(rename = "_original_length", skip_serializing_if = "Option::is_none", default)]
        original_length: Option<usize>,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message with plain text content.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: MessageContent::Text(content.into()),
            compressed: None,
            original_length: None,
        }
    }

    /// Create a user message with multipart content (images + text).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message::User {
            content: MessageContent::Parts(parts),
            compressed: None,
            original_length: None,
        }
    }

    /// Create an assistant message with text content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            compressed: None,
            original_length: None,
        }
    }

    /// Create an assistant message carrying tool-call records.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls: Some(tool_calls),
            compressed: None,
            original_length: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            compressed: None,
            original_length: None,
        }
    }

    /// The wire role of this message.
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// String content, when the message carries one.
    ///
    /// Multipart user content returns `None` — the compressor only rewrites
    /// plain-string content.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Message::System { content } => Some(content),
            Message::User {
                content: MessageContent::Text(text),
                ..
            } => Some(text),
            Message::User { .. } => None,
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }

    /// Clone this message with its string content replaced and the
    /// compression markers set. System messages are returned unchanged.
    pub fn with_compressed_content(&self, new_content: String, original_len: usize) -> Message {
        match self {
            Message::System { .. } => self.clone(),
            Message::User { .. } => Message::User {
                content: MessageContent::Text(new_content),
                compressed: Some(true),
                original_length: Some(original_len),
            },
            Message::Assistant { tool_calls, .. } => Message::Assistant {
                content: Some(new_content),
                tool_calls: tool_calls.clone(),
                compressed: Some(true),
                original_length: Some(original_len),
            },
            Message::Tool { tool_call_id, .. } => Message::Tool {
                content: new_content,
                tool_call_id: tool_call_id.clone(),
                compressed: Some(true),
                original_length: Some(original_len),
            },
        }
    }

    /// Whether the compressor has rewritten this message.
    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            Message::User {
                compressed: Some(true),
                ..
            } | Message::Assistant {
                compressed: Some(true),
                ..
            } | Message::Tool {
                compressed: Some(true),
                ..
            }
        )
    }
}

// ─────────────────────────────────────────────
// User content (text or multipart)
// ─────────────────────────────────────────────

/// User message content — plain text, or a parts array for vision input.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One part of a multipart user message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image payload — a URL or a base64 data URI.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

// ─────────────────────────────────────────────
// Tool calls
// ─────────────────────────────────────────────

/// A tool-call record on an assistant message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-supplied id, unique within a turn.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the JSON-encoded arguments into a map. Malformed arguments
    /// decode to an empty map rather than failing the turn.
    pub fn parsed_arguments(&self) -> HashMap<String, serde_json::Value> {
        serde_json::from_str(&self.function.arguments).unwrap_or_default()
    }
}

/// The function name and JSON-encoded arguments within a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object; non-ASCII is preserved as-is.
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Tool definitions (request side)
// ─────────────────────────────────────────────

/// A tool schema as the LLM sees it: `{type:"function", function:{…}}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// LLM response
// ─────────────────────────────────────────────

/// What comes back from one chat-completion call.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// Assistant text; `None` when the turn is tool calls only.
    pub content: Option<String>,
    /// Tool calls in the order the model emitted them.
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
}

impl LlmResponse {
    /// An error surfaced as plain content, so the loop breaks cleanly.
    pub fn error(msg: impl Into<String>) -> Self {
        LlmResponse {
            content: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage counters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Chat-completions wire structs
// ─────────────────────────────────────────────

/// Request body for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Raw response body, deserialized then converted to [`LlmResponse`].
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantReply,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantReply {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl From<ChatCompletionResponse> for LlmResponse {
    fn from(resp: ChatCompletionResponse) -> Self {
        match resp.choices.into_iter().next() {
            Some(choice) => LlmResponse {
                content: choice.message.content,
                tool_calls: choice.message.tool_calls.unwrap_or_default(),
                finish_reason: choice.finish_reason,
                usage: resp.usage,
            },
            None => LlmResponse::error("No choices in response"),
        }
    }
}

// ─────────────────────────────────────────────
// Session record
// ─────────────────────────────────────────────

/// A conversation transcript keyed by `channel:chat_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Session {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
