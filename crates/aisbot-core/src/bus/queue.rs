//! `MessageBus` — the envelope-typed facade the rest of the process uses.
//!
//! Wraps whichever [`BusProvider`] the factory produced. Transports publish
//! inbound and subscribe outbound; the agent loop consumes inbound and
//! publishes outbound; one dispatcher task fans replies out to channel
//! callbacks.

use std::sync::Arc;

use super::envelope::{InboundMessage, OutboundMessage};
use super::provider::{BusProvider, OutboundCallback};

/// The message bus connecting transports and the agent loop.
pub struct MessageBus {
    provider: Arc<dyn BusProvider>,
}

impl MessageBus {
    pub fn new(provider: Arc<dyn BusProvider>) -> Self {
        MessageBus { provider }
    }

    /// Initialize the underlying provider (topics, endpoints).
    pub async fn initialize(&self) -> anyhow::Result<()> {
        self.provider.initialize().await
    }

    /// Publish a transport message toward the agent.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        self.provider.publish_inbound(&msg).await
    }

    /// Next transport message, or `None` after the provider's poll timeout.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.provider.consume_inbound().await
    }

    /// Publish an agent reply toward the transports.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        self.provider.publish_outbound(&msg).await
    }

    /// Next agent reply, or `None` after the provider's poll timeout.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.provider.consume_outbound().await
    }

    /// Register a channel callback for the dispatcher.
    pub fn subscribe_outbound(&self, channel: &str, callback: OutboundCallback) {
        self.provider.subscribe_outbound(channel, callback);
    }

    /// Run the outbound fan-out loop until `stop`.
    pub async fn dispatch_outbound(&self) {
        self.provider.dispatch_outbound().await;
    }

    /// Stop the dispatcher and release provider resources.
    pub fn stop(&self) {
        self.provider.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::dds::DdsProvider;

    async fn bus(domain: u32) -> MessageBus {
        let bus = MessageBus::new(Arc::new(DdsProvider::new(domain)));
        bus.initialize().await.unwrap();
        bus
    }

    #[tokio::test]
    async fn full_round_trip_through_facade() {
        let bus = bus(830).await;

        bus.publish_inbound(InboundMessage::new("telegram", "u42", "c99", "What is 2+2?"))
            .await
            .unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "What is 2+2?");

        bus.publish_outbound(OutboundMessage::new(
            received.channel.clone(),
            received.chat_id.clone(),
            "The answer is 4.",
        ))
        .await
        .unwrap();

        let reply = bus.consume_outbound().await.unwrap();
        assert_eq!(reply.channel, "telegram");
        assert_eq!(reply.chat_id, "c99");
        assert_eq!(reply.content, "The answer is 4.");
    }

    #[tokio::test]
    async fn messages_keep_publish_order() {
        let bus = bus(831).await;
        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "local", "d", format!("msg-{i}")))
                .await
                .unwrap();
        }
        for i in 1..=3 {
            assert_eq!(bus.consume_inbound().await.unwrap().content, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn concurrent_publishers_both_arrive() {
        let bus = Arc::new(bus(832).await);

        let b1 = bus.clone();
        let h1 = tokio::spawn(async move {
            b1.publish_inbound(InboundMessage::new("telegram", "u1", "c1", "from telegram"))
                .await
                .unwrap();
        });
        let b2 = bus.clone();
        let h2 = tokio::spawn(async move {
            b2.publish_inbound(InboundMessage::new("discord", "u2", "c2", "from discord"))
                .await
                .unwrap();
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let first = bus.consume_inbound().await.unwrap();
        let second = bus.consume_inbound().await.unwrap();
        let channels = [first.channel, second.channel];
        assert!(channels.contains(&"telegram".to_string()));
        assert!(channels.contains(&"discord".to_string()));
    }
}
