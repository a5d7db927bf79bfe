//! The `BusProvider` contract — a small capability record every transport
//! substrate implements. New fabrics slot in by implementing this trait;
//! nothing above the bus knows which one is running.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::envelope::{InboundMessage, OutboundMessage};

/// Async callback invoked by the outbound dispatcher for a channel's
/// messages. Errors are logged by the dispatcher and isolated from sibling
/// callbacks.
pub type OutboundCallback = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Provider-agnostic bus operations.
///
/// Consume calls block for a bounded interval (about one second) and return
/// `None` on timeout, so callers poll cooperatively and can observe a stop
/// flag between polls. Malformed payloads are dropped with a warning and
/// surface as `None` as well — the bus never takes the agent loop down.
#[async_trait]
pub trait BusProvider: Send + Sync {
    /// Set up topics, publishers, and subscribers. Called once before use.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Publish a message from a transport toward the agent.
    async fn publish_inbound(&self, msg: &InboundMessage) -> anyhow::Result<()>;

    /// Receive the next transport message, or `None` after the poll timeout.
    async fn consume_inbound(&self) -> Option<InboundMessage>;

    /// Publish an agent reply toward the transports.
    async fn publish_outbound(&self, msg: &OutboundMessage) -> anyhow::Result<()>;

    /// Receive the next agent reply, or `None` after the poll timeout.
    async fn consume_outbound(&self) -> Option<OutboundMessage>;

    /// Register a callback for outbound messages on one channel. Multiple
    /// callbacks per channel are invoked sequentially, in registration
    /// order, per message.
    fn subscribe_outbound(&self, channel: &str, callback: OutboundCallback);

    /// Run the outbound fan-out loop until [`stop`](Self::stop) is called.
    async fn dispatch_outbound(&self);

    /// Signal the dispatcher to exit after its current poll and release
    /// transport resources where applicable.
    fn stop(&self);
}

impl std::fmt::Debug for dyn BusProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn BusProvider")
    }
}
