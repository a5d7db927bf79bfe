//! Message bus — the fabric that decouples chat transports from the agent.
//!
//! Layering, leaves first:
//! - [`fabric`] / [`zenoh`]: the raw pub/sub substrates (opaque string
//!   payloads, no knowledge of envelopes)
//! - [`envelope`]: the typed envelopes and their JSON codec
//! - [`provider`]: the `BusProvider` capability contract
//! - [`dds`] / [`zenoh`]: the two provider implementations
//! - [`factory`]: provider selection from config
//! - [`queue`]: the `MessageBus` facade the rest of the process talks to

pub mod dds;
pub mod envelope;
pub mod fabric;
pub mod factory;
pub mod provider;
pub mod queue;
pub mod zenoh;

pub use envelope::{InboundMessage, OutboundMessage};
pub use factory::BusFactory;
pub use provider::{BusProvider, OutboundCallback};
pub use queue::MessageBus;
