//! aisbot core — shared types, message bus, configuration, and sessions.
//!
//! This crate holds everything the agent plane and the binary both need:
//! - **types**: OpenAI-format chat messages, tool calls, LLM responses
//! - **bus**: envelopes, the `BusProvider` contract, the DDS-style and
//!   Zenoh-style providers, the factory, and the `MessageBus` facade
//! - **config**: YAML configuration schema and loader
//! - **session**: per-conversation transcript store (JSONL, append + reload)

pub mod bus;
pub mod config;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::envelope::{InboundMessage, OutboundMessage};
pub use bus::queue::MessageBus;
pub use config::{Config, load_config};
pub use session::SessionStore;
