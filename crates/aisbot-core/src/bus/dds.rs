//! Pull-based bus provider over the data-distribution fabric.
//!
//! Two no-key topics, `inbound` and `outbound`, each with one publisher and
//! one subscriber held by the provider. Reads block with a bounded receive
//! timeout and return `None`, giving callers a steady cancellation
//! checkpoint. Payloads are JSON envelopes; parse failures drop the sample
//! with a warning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::envelope::{decode_envelope, encode_envelope, InboundMessage, OutboundMessage};
use super::fabric::{DataFabric, TopicPublisher, TopicSubscriber};
use super::provider::{BusProvider, OutboundCallback};

/// Bounded receive timeout for one poll.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

const INBOUND_TOPIC: &str = "inbound";
const OUTBOUND_TOPIC: &str = "outbound";

/// DDS-style provider: pull-based reads over per-domain topics.
pub struct DdsProvider {
    domain_id: u32,
    inbound_pub: Mutex<Option<TopicPublisher>>,
    outbound_pub: Mutex<Option<TopicPublisher>>,
    inbound_sub: tokio::sync::Mutex<Option<TopicSubscriber>>,
    outbound_sub: tokio::sync::Mutex<Option<TopicSubscriber>>,
    callbacks: Mutex<HashMap<String, Vec<OutboundCallback>>>,
    running: AtomicBool,
}

impl DdsProvider {
    pub fn new(domain_id: u32) -> Self {
        DdsProvider {
            domain_id,
            inbound_pub: Mutex::new(None),
            outbound_pub: Mutex::new(None),
            inbound_sub: tokio::sync::Mutex::new(None),
            outbound_sub: tokio::sync::Mutex::new(None),
            callbacks: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    fn publisher_for(&self, slot: &Mutex<Option<TopicPublisher>>) -> Option<TopicPublisher> {
        slot.lock().unwrap().clone()
    }
}

/// Decode a fabric sample, dropping malformed payloads with a warning.
fn decode_or_drop<T: DeserializeOwned>(payload: &str, topic: &str) -> Option<T> {
    match decode_envelope(payload) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(topic, error = %e, "dropping malformed bus payload");
            None
        }
    }
}

#[async_trait]
impl BusProvider for DdsProvider {
    async fn initialize(&self) -> anyhow::Result<()> {
        info!(domain_id = self.domain_id, "[dds] initializing");
        let fabric = DataFabric::attach(self.domain_id);

        let inbound = fabric.create_no_key_topic(INBOUND_TOPIC);
        let outbound = fabric.create_no_key_topic(OUTBOUND_TOPIC);

        *self.inbound_pub.lock().unwrap() = Some(fabric.create_publisher(&inbound));
        *self.outbound_pub.lock().unwrap() = Some(fabric.create_publisher(&outbound));
        *self.inbound_sub.lock().await = Some(fabric.create_subscriber(&inbound));
        *self.outbound_sub.lock().await = Some(fabric.create_subscriber(&outbound));

        info!(domain_id = self.domain_id, "[dds] initialized");
        Ok(())
    }

    async fn publish_inbound(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let publisher = self
            .publisher_for(&self.inbound_pub)
            .ok_or_else(|| anyhow::anyhow!("dds provider not initialized"))?;
        publisher.send(encode_envelope(msg)?);
        debug!(session_key = %msg.session_key(), "[dds] published inbound");
        Ok(())
    }

    async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut guard = self.inbound_sub.lock().await;
        let sub = guard.as_mut()?;
        let payload = sub.recv(RECV_TIMEOUT).await?;
        drop(guard);
        decode_or_drop(&payload, INBOUND_TOPIC)
    }

    async fn publish_outbound(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let publisher = self
            .publisher_for(&self.outbound_pub)
            .ok_or_else(|| anyhow::anyhow!("dds provider not initialized"))?;
        publisher.send(encode_envelope(msg)?);
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "[dds] published outbound");
        Ok(())
    }

    async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut guard = self.outbound_sub.lock().await;
        let sub = guard.as_mut()?;
        let payload = sub.recv(RECV_TIMEOUT).await?;
        drop(guard);
        decode_or_drop(&payload, OUTBOUND_TOPIC)
    }

    fn subscribe_outbound(&self, channel: &str, callback: OutboundCallback) {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.entry(channel.to_string()).or_default().push(callback);
        debug!(channel, "[dds] outbound subscription registered");
    }

    async fn dispatch_outbound(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("[dds] outbound dispatcher started");

        while self.running.load(Ordering::SeqCst) {
            let payload = {
                let mut guard = self.outbound_sub.lock().await;
                match guard.as_mut() {
                    Some(sub) => sub.recv(RECV_TIMEOUT).await,
                    None => {
                        warn!("[dds] dispatcher started before initialize");
                        return;
                    }
                }
            };
            let Some(payload) = payload else { continue };
            let Some(msg) = decode_or_drop::<OutboundMessage>(&payload, OUTBOUND_TOPIC) else {
                continue;
            };

            let targets: Vec<OutboundCallback> = {
                let callbacks = self.callbacks.lock().unwrap();
                callbacks.get(&msg.channel).cloned().unwrap_or_default()
            };
            for callback in targets {
                if let Err(e) = callback(msg.clone()).await {
                    warn!(channel = %msg.channel, error = %e, "[dds] outbound callback failed");
                }
            }
        }
        info!("[dds] outbound dispatcher stopped");
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("[dds] stopped");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn provider(domain: u32) -> DdsProvider {
        let p = DdsProvider::new(domain);
        p.initialize().await.unwrap();
        p
    }

    #[tokio::test]
    async fn inbound_round_trip() {
        let p = provider(810).await;
        let msg = InboundMessage::new("telegram", "u1", "c1", "hello");
        p.publish_inbound(&msg).await.unwrap();

        let got = p.consume_inbound().await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn two_providers_on_one_domain_interconnect() {
        let a = provider(811).await;
        let b = provider(811).await;

        let msg = InboundMessage::new("cli", "u", "c", "cross");
        a.publish_inbound(&msg).await.unwrap();
        let got = b.consume_inbound().await.unwrap();
        assert_eq!(got.content, "cross");
    }

    #[tokio::test]
    async fn consume_returns_none_on_timeout() {
        let p = provider(812).await;
        let start = std::time::Instant::now();
        assert!(p.consume_inbound().await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_not_fatal() {
        let p = provider(813).await;

        // Inject garbage straight onto the topic.
        let fabric = DataFabric::attach(813);
        let topic = fabric.create_no_key_topic(INBOUND_TOPIC);
        fabric.create_publisher(&topic).send("{not valid".into());

        assert!(p.consume_inbound().await.is_none());

        // A good message afterwards still flows.
        let msg = InboundMessage::new("cli", "u", "c", "ok");
        p.publish_inbound(&msg).await.unwrap();
        assert_eq!(p.consume_inbound().await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn double_encoded_payload_is_accepted() {
        let p = provider(814).await;

        let msg = OutboundMessage::new("cli", "c", "quoted");
        let wire = encode_envelope(&msg).unwrap();
        let double = serde_json::to_string(&wire).unwrap();

        let fabric = DataFabric::attach(814);
        let topic = fabric.create_no_key_topic(OUTBOUND_TOPIC);
        fabric.create_publisher(&topic).send(double);

        assert_eq!(p.consume_outbound().await.unwrap().content, "quoted");
    }

    #[tokio::test]
    async fn dispatcher_routes_by_channel_and_isolates_errors() {
        let p = Arc::new(provider(815).await);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        // First callback always fails; second must still run.
        let failing: OutboundCallback =
            Arc::new(|_msg| Box::pin(async { anyhow::bail!("callback exploded") }));
        let seen_cb = seen.clone();
        let recording: OutboundCallback = Arc::new(move |msg| {
            let seen = seen_cb.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(msg.content);
                Ok(())
            })
        });
        p.subscribe_outbound("telegram", failing);
        p.subscribe_outbound("telegram", recording);

        let runner = {
            let p = p.clone();
            tokio::spawn(async move { p.dispatch_outbound().await })
        };
        // Give the dispatcher a moment to enter its loop.
        tokio::time::sleep(Duration::from_millis(20)).await;

        p.publish_outbound(&OutboundMessage::new("telegram", "c1", "for telegram"))
            .await
            .unwrap();
        p.publish_outbound(&OutboundMessage::new("discord", "c2", "not ours"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        p.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), runner).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["for telegram"]);
    }
}
