//! In-process data-distribution fabric.
//!
//! Models the DDS interaction style: named no-key topics inside a numeric
//! domain, independent publishers and subscribers per topic, and pull-based
//! reads with a receive timeout. Domains are process-global, so two
//! providers attached to the same domain id see each other's samples the way
//! DDS participants discover one another. Samples are opaque strings; a
//! subscriber only sees samples published after it was created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Ring capacity per topic; a subscriber that lags beyond this loses the
/// oldest samples (best-effort delivery, like a bounded history QoS).
const TOPIC_CAPACITY: usize = 256;

static DOMAINS: OnceLock<Mutex<HashMap<u32, Arc<DataFabric>>>> = OnceLock::new();

/// One pub/sub domain holding named topics.
pub struct DataFabric {
    domain_id: u32,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl DataFabric {
    /// Attach to a domain, creating it on first touch. All callers with the
    /// same id share one fabric.
    pub fn attach(domain_id: u32) -> Arc<DataFabric> {
        let domains = DOMAINS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = domains.lock().unwrap();
        Arc::clone(map.entry(domain_id).or_insert_with(|| {
            debug!(domain_id, "creating data fabric domain");
            Arc::new(DataFabric {
                domain_id,
                topics: Mutex::new(HashMap::new()),
            })
        }))
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    /// Create (or look up) a no-key topic.
    pub fn create_no_key_topic(&self, name: &str) -> Topic {
        let mut topics = self.topics.lock().unwrap();
        let tx = topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone();
        Topic {
            name: name.to_string(),
            tx,
        }
    }

    pub fn create_publisher(&self, topic: &Topic) -> TopicPublisher {
        TopicPublisher {
            topic_name: topic.name.clone(),
            tx: topic.tx.clone(),
        }
    }

    pub fn create_subscriber(&self, topic: &Topic) -> TopicSubscriber {
        TopicSubscriber {
            topic_name: topic.name.clone(),
            rx: topic.tx.subscribe(),
        }
    }
}

/// A handle to one named topic within a domain.
#[derive(Clone)]
pub struct Topic {
    name: String,
    tx: broadcast::Sender<String>,
}

impl Topic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Writer endpoint for one topic.
#[derive(Clone)]
pub struct TopicPublisher {
    topic_name: String,
    tx: broadcast::Sender<String>,
}

impl TopicPublisher {
    /// Publish one sample. A topic with no attached readers silently drops
    /// the sample.
    pub fn send(&self, sample: String) {
        if self.tx.send(sample).is_err() {
            debug!(topic = %self.topic_name, "no subscribers; sample dropped");
        }
    }
}

/// Reader endpoint for one topic.
pub struct TopicSubscriber {
    topic_name: String,
    rx: broadcast::Receiver<String>,
}

impl TopicSubscriber {
    /// Wait up to `timeout` for the next sample. Returns `None` on timeout.
    /// A lagged reader skips the overwritten samples and keeps reading.
    pub async fn recv(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.rx.recv()).await {
                Ok(Ok(sample)) => return Some(sample),
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(topic = %self.topic_name, skipped, "subscriber lagged; samples lost");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_receive() {
        let fabric = DataFabric::attach(900);
        let topic = fabric.create_no_key_topic("t1");
        let mut sub = fabric.create_subscriber(&topic);
        let publisher = fabric.create_publisher(&topic);

        publisher.send("sample-1".into());
        let got = sub.recv(Duration::from_millis(200)).await;
        assert_eq!(got.as_deref(), Some("sample-1"));
    }

    #[tokio::test]
    async fn recv_times_out_when_quiet() {
        let fabric = DataFabric::attach(901);
        let topic = fabric.create_no_key_topic("quiet");
        let mut sub = fabric.create_subscriber(&topic);

        let got = sub.recv(Duration::from_millis(50)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn same_domain_instances_share_topics() {
        let a = DataFabric::attach(902);
        let b = DataFabric::attach(902);
        let topic_a = a.create_no_key_topic("shared");
        let topic_b = b.create_no_key_topic("shared");

        let mut sub = b.create_subscriber(&topic_b);
        a.create_publisher(&topic_a).send("hello".into());
        assert_eq!(
            sub.recv(Duration::from_millis(200)).await.as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn different_domains_are_isolated() {
        let a = DataFabric::attach(903);
        let b = DataFabric::attach(904);
        let topic_a = a.create_no_key_topic("x");
        let topic_b = b.create_no_key_topic("x");

        let mut sub = b.create_subscriber(&topic_b);
        a.create_publisher(&topic_a).send("leak?".into());
        assert!(sub.recv(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn publish_without_readers_is_silent() {
        let fabric = DataFabric::attach(905);
        let topic = fabric.create_no_key_topic("void");
        // No subscriber attached; must not panic or error.
        fabric.create_publisher(&topic).send("dropped".into());
    }

    #[tokio::test]
    async fn samples_arrive_in_publish_order() {
        let fabric = DataFabric::attach(906);
        let topic = fabric.create_no_key_topic("ordered");
        let mut sub = fabric.create_subscriber(&topic);
        let publisher = fabric.create_publisher(&topic);

        for i in 0..5 {
            publisher.send(format!("s{i}"));
        }
        for i in 0..5 {
            let got = sub.recv(Duration::from_millis(200)).await.unwrap();
            assert_eq!(got, format!("s{i}"));
        }
    }
}
