//! LLM provider layer.
//!
//! - [`traits::LlmProvider`] — the one method the runtime depends on:
//!   `chat(messages, tools, model, config) → LlmResponse`
//! - [`registry`] — static specs for the supported backends + model matching
//! - [`http_provider::HttpProvider`] — generic OpenAI-compatible client
//! - [`http_provider::create_provider`] — builder from model name + config

pub mod http_provider;
pub mod registry;
pub mod traits;

pub use http_provider::{create_provider, HttpProvider};
pub use registry::{find_spec, ProviderSpec, PROVIDERS};
pub use traits::{LlmProvider, LlmRequestConfig};
