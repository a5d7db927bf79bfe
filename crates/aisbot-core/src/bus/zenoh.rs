//! Push-based bus provider in the Zenoh interaction style.
//!
//! A session owns a router of key expressions; publishers `put` samples
//! which are pushed straight into every subscriber queue declared on that
//! key. Subscribers expose a non-blocking `try_recv`, and the provider turns
//! that into a cooperative poll: try, sleep ten milliseconds, try again,
//! bounded at about one second so the caller keeps its cancellation
//! checkpoint. A session is an in-process scope; a networked deployment
//! would extend the scope through the session config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::envelope::{decode_envelope, encode_envelope, InboundMessage, OutboundMessage};
use super::provider::{BusProvider, OutboundCallback};

/// Sleep between `try_recv` attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Overall budget for one consume poll.
const POLL_BUDGET: Duration = Duration::from_secs(1);

const INBOUND_KEY: &str = "inbound";
const OUTBOUND_KEY: &str = "outbound";

// ─────────────────────────────────────────────
// Push fabric (session / publisher / subscriber)
// ─────────────────────────────────────────────

/// One received sample.
pub struct Sample {
    pub payload: String,
}

#[derive(Default)]
struct Router {
    keys: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Sample>>>>,
}

/// A connection to the push fabric. Endpoints declared on the same session
/// see each other's samples.
#[derive(Clone)]
pub struct Session {
    router: Arc<Router>,
}

impl Session {
    /// Open a session. The configuration map is accepted for parity with
    /// networked deployments and currently only logged.
    pub fn open(config: &serde_json::Value) -> Session {
        if !config.is_null() {
            debug!(config = %config, "[zenoh] session config supplied");
        }
        Session {
            router: Arc::new(Router::default()),
        }
    }

    pub fn declare_publisher(&self, key: &str) -> PushPublisher {
        PushPublisher {
            key: key.to_string(),
            router: Arc::clone(&self.router),
        }
    }

    pub fn declare_subscriber(&self, key: &str) -> PushSubscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        self.router
            .keys
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(tx);
        PushSubscriber {
            key: key.to_string(),
            rx: Mutex::new(rx),
        }
    }
}

/// Writer endpoint: pushes samples to every subscriber on the key.
#[derive(Clone)]
pub struct PushPublisher {
    key: String,
    router: Arc<Router>,
}

impl PushPublisher {
    pub fn put(&self, payload: impl Into<String>) {
        let payload = payload.into();
        let mut keys = self.router.keys.lock().unwrap();
        if let Some(senders) = keys.get_mut(&self.key) {
            // Closed queues belong to undeclared subscribers; prune as we go.
            senders.retain(|tx| {
                tx.send(Sample {
                    payload: payload.clone(),
                })
                .is_ok()
            });
        }
    }
}

/// Reader endpoint with a non-blocking receive.
pub struct PushSubscriber {
    key: String,
    rx: Mutex<mpsc::UnboundedReceiver<Sample>>,
}

impl PushSubscriber {
    pub fn try_recv(&self) -> Option<Sample> {
        self.rx.lock().unwrap().try_recv().ok()
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// Zenoh-style provider: declared publishers and subscribers on the
/// `inbound` and `outbound` keys, push delivery, poll-based consume.
pub struct ZenohProvider {
    config: serde_json::Value,
    session: Mutex<Option<Session>>,
    inbound_pub: Mutex<Option<PushPublisher>>,
    outbound_pub: Mutex<Option<PushPublisher>>,
    inbound_sub: tokio::sync::Mutex<Option<PushSubscriber>>,
    outbound_sub: tokio::sync::Mutex<Option<PushSubscriber>>,
    callbacks: Mutex<HashMap<String, Vec<OutboundCallback>>>,
    running: AtomicBool,
}

impl ZenohProvider {
    pub fn new(config: serde_json::Value) -> Self {
        ZenohProvider {
            config,
            session: Mutex::new(None),
            inbound_pub: Mutex::new(None),
            outbound_pub: Mutex::new(None),
            inbound_sub: tokio::sync::Mutex::new(None),
            outbound_sub: tokio::sync::Mutex::new(None),
            callbacks: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// The session handle, for wiring additional endpoints (tests, probes).
    pub fn session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }
}

/// Poll `try_recv` with short sleeps until a sample arrives or the budget
/// runs out.
async fn poll_sample(sub: &PushSubscriber) -> Option<Sample> {
    let deadline = tokio::time::Instant::now() + POLL_BUDGET;
    loop {
        if let Some(sample) = sub.try_recv() {
            return Some(sample);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn decode_or_drop<T: DeserializeOwned>(sample: &Sample, key: &str) -> Option<T> {
    match decode_envelope(&sample.payload) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(key, error = %e, "dropping malformed bus payload");
            None
        }
    }
}

#[async_trait]
impl BusProvider for ZenohProvider {
    async fn initialize(&self) -> anyhow::Result<()> {
        info!("[zenoh] initializing");
        let session = Session::open(&self.config);

        *self.inbound_pub.lock().unwrap() = Some(session.declare_publisher(INBOUND_KEY));
        *self.outbound_pub.lock().unwrap() = Some(session.declare_publisher(OUTBOUND_KEY));
        *self.inbound_sub.lock().await = Some(session.declare_subscriber(INBOUND_KEY));
        *self.outbound_sub.lock().await = Some(session.declare_subscriber(OUTBOUND_KEY));
        *self.session.lock().unwrap() = Some(session);

        info!("[zenoh] initialized");
        Ok(())
    }

    async fn publish_inbound(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let publisher = self
            .inbound_pub
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("zenoh provider not initialized"))?;
        publisher.put(encode_envelope(msg)?);
        debug!(session_key = %msg.session_key(), "[zenoh] published inbound");
        Ok(())
    }

    async fn consume_inbound(&self) -> Option<InboundMessage> {
        let guard = self.inbound_sub.lock().await;
        let sub = guard.as_ref()?;
        let sample = poll_sample(sub).await?;
        decode_or_drop(&sample, INBOUND_KEY)
    }

    async fn publish_outbound(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let publisher = self
            .outbound_pub
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("zenoh provider not initialized"))?;
        publisher.put(encode_envelope(msg)?);
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, "[zenoh] published outbound");
        Ok(())
    }

    async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let guard = self.outbound_sub.lock().await;
        let sub = guard.as_ref()?;
        let sample = poll_sample(sub).await?;
        decode_or_drop(&sample, OUTBOUND_KEY)
    }

    fn subscribe_outbound(&self, channel: &str, callback: OutboundCallback) {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.entry(channel.to_string()).or_default().push(callback);
        debug!(channel, "[zenoh] outbound subscription registered");
    }

    async fn dispatch_outbound(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("[zenoh] outbound dispatcher started");

        while self.running.load(Ordering::SeqCst) {
            let sample = {
                let guard = self.outbound_sub.lock().await;
                match guard.as_ref() {
                    Some(sub) => poll_sample(sub).await,
                    None => {
                        warn!("[zenoh] dispatcher started before initialize");
                        return;
                    }
                }
            };
            let Some(sample) = sample else { continue };
            let Some(msg) = decode_or_drop::<OutboundMessage>(&sample, OUTBOUND_KEY) else {
                continue;
            };

            let targets: Vec<OutboundCallback> = {
                let callbacks = self.callbacks.lock().unwrap();
                callbacks.get(&msg.channel).cloned().unwrap_or_default()
            };
            for callback in targets {
                if let Err(e) = callback(msg.clone()).await {
                    warn!(channel = %msg.channel, error = %e, "[zenoh] outbound callback failed");
                }
            }
        }
        info!("[zenoh] outbound dispatcher stopped");
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Undeclare endpoints and close the session; subscriber queues close
        // with their senders.
        *self.inbound_pub.lock().unwrap() = None;
        *self.outbound_pub.lock().unwrap() = None;
        *self.session.lock().unwrap() = None;
        if let Ok(mut sub) = self.inbound_sub.try_lock() {
            *sub = None;
        }
        if let Ok(mut sub) = self.outbound_sub.try_lock() {
            *sub = None;
        }
        info!("[zenoh] stopped");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn provider() -> ZenohProvider {
        let p = ZenohProvider::new(serde_json::Value::Null);
        p.initialize().await.unwrap();
        p
    }

    #[tokio::test]
    async fn push_fabric_delivers_to_all_subscribers() {
        let session = Session::open(&serde_json::Value::Null);
        let sub_a = session.declare_subscriber("fanout");
        let sub_b = session.declare_subscriber("fanout");
        session.declare_publisher("fanout").put("x");

        assert_eq!(sub_a.try_recv().unwrap().payload, "x");
        assert_eq!(sub_b.try_recv().unwrap().payload, "x");
        assert!(sub_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn try_recv_is_non_blocking() {
        let session = Session::open(&serde_json::Value::Null);
        let sub = session.declare_subscriber("empty");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn sessions_are_isolated_scopes() {
        let a = Session::open(&serde_json::Value::Null);
        let b = Session::open(&serde_json::Value::Null);
        let sub = b.declare_subscriber("k");
        a.declare_publisher("k").put("leak?");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn inbound_round_trip() {
        let p = provider().await;
        let msg = InboundMessage::new("feishu", "u1", "c1", "ping");
        p.publish_inbound(&msg).await.unwrap();

        let got = p.consume_inbound().await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn outbound_round_trip() {
        let p = provider().await;
        let msg = OutboundMessage::new("feishu", "c1", "pong");
        p.publish_outbound(&msg).await.unwrap();

        let got = p.consume_outbound().await.unwrap();
        assert_eq!(got.content, "pong");
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let p = provider().await;

        // Inject garbage through a raw publisher on the provider's session.
        let session = p.session().unwrap();
        session.declare_publisher(INBOUND_KEY).put("][garbage");

        let msg = InboundMessage::new("cli", "u", "c", "after");
        p.publish_inbound(&msg).await.unwrap();

        let mut contents = Vec::new();
        for _ in 0..2 {
            if let Some(m) = p.consume_inbound().await {
                contents.push(m.content);
            }
        }
        assert_eq!(contents, ["after"]);
    }

    #[tokio::test]
    async fn dispatcher_fans_out_per_channel() {
        let p = std::sync::Arc::new(provider().await);
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = seen.clone();
        let callback: OutboundCallback = Arc::new(move |msg| {
            let seen = seen_cb.clone();
            Box::pin(async move {
                seen.lock()
                    .unwrap()
                    .push(format!("{}:{}", msg.channel, msg.content));
                Ok(())
            })
        });
        p.subscribe_outbound("whatsapp", callback);

        let runner = {
            let p = p.clone();
            tokio::spawn(async move { p.dispatch_outbound().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        p.publish_outbound(&OutboundMessage::new("whatsapp", "c", "hey"))
            .await
            .unwrap();
        p.publish_outbound(&OutboundMessage::new("discord", "c", "not ours"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        p.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), runner).await;

        assert_eq!(seen.lock().unwrap().as_slice(), ["whatsapp:hey"]);
    }
}
