//! Bus envelopes and their JSON codec.
//!
//! Envelopes travel the fabric as JSON text. Some substrates re-quote the
//! payload on the way through, so the decoder parses once and, if it finds a
//! JSON string literal, parses again. Timestamps are ISO-8601 strings.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Codec failures. Malformed payloads are dropped by the providers with a
/// warning; they never reach the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

// ─────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────

/// A message from a chat transport to the agent.
///
/// `channel` + `chat_id` identify the conversation; both are non-empty.
/// The reserved channel `"system"` marks intra-process messages (subagent
/// results), whose `chat_id` carries the origin `channel:chat_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    /// Local file paths of attached media, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// The conversation identity: `channel:chat_id`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A reply from the agent to a chat transport. Routed solely by `channel`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            timestamp: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────

/// Serialize an envelope to its JSON wire form.
pub fn encode_envelope<T: Serialize>(msg: &T) -> Result<String, EnvelopeError> {
    Ok(serde_json::to_string(msg)?)
}

/// Parse an envelope, tolerating a double-encoded payload: parse once, and
/// if the result is still a string, parse that string again.
pub fn decode_envelope<T: DeserializeOwned>(payload: &str) -> Result<T, EnvelopeError> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    let value = match value {
        serde_json::Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };
    if !value.is_object() {
        return Err(EnvelopeError::NotAnObject);
    }
    Ok(serde_json::from_value(value)?)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
