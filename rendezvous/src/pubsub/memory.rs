//! In-process pub/sub hub.
//!
//! Every [`MemoryPubSub`] created from the same [`MemoryHub`] sees the others'
//! messages, which makes it a stand-in for a real network when several
//! endpoints run in one process. Faults can be injected per endpoint.

use crate::error::{Result, SignalingError};
use crate::protocol::{SignalingMessage, Topic};
use crate::pubsub::{PubSub, Subscription};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

struct Subscriber {
    endpoint_id: u64,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

#[derive(Default)]
struct HubInner {
    topics: Mutex<HashMap<Topic, Vec<Subscriber>>>,
    next_endpoint_id: AtomicU64,
}

/// Shared broker connecting in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new endpoint attached to this hub.
    pub fn endpoint(&self) -> MemoryPubSub {
        let endpoint_id = self.inner.next_endpoint_id.fetch_add(1, Ordering::Relaxed) + 1;
        MemoryPubSub {
            hub: self.clone(),
            endpoint_id,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Number of live subscriptions on a topic.
    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        let topics = self.inner.topics.lock().await;
        topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct Faults {
    failing_subscribes: AtomicUsize,
    failing_publishes: AtomicUsize,
    subscribe_attempts: AtomicUsize,
    publish_attempts: AtomicUsize,
}

impl Faults {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One endpoint of a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryPubSub {
    hub: MemoryHub,
    endpoint_id: u64,
    faults: Arc<Faults>,
}

impl MemoryPubSub {
    /// Makes the next `count` subscribe attempts fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.faults.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` publish attempts fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.faults.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Subscribe attempts made so far, failed ones included.
    pub fn subscribe_attempts(&self) -> usize {
        self.faults.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Publish attempts made so far, failed ones included.
    pub fn publish_attempts(&self) -> usize {
        self.faults.publish_attempts.load(Ordering::SeqCst)
    }
}

impl PubSub for MemoryPubSub {
    async fn subscribe(&self, topic: &Topic) -> Result<Subscription> {
        self.faults.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if Faults::take(&self.faults.failing_subscribes) {
            return Err(SignalingError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut topics = self.hub.inner.topics.lock().await;
            topics.entry(topic.clone()).or_default().push(Subscriber {
                endpoint_id: self.endpoint_id,
                tx,
            });
        }

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        })))
    }

    async fn publish(&self, topic: &Topic, payload: SignalingMessage) -> Result<()> {
        self.faults.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if Faults::take(&self.faults.failing_publishes) {
            return Err(SignalingError::SendFailed {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }

        let mut topics = self.hub.inner.topics.lock().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| !s.tx.is_closed());
            for subscriber in subscribers.iter() {
                if subscriber.endpoint_id != self.endpoint_id {
                    let _ = subscriber.tx.send(payload.clone());
                }
            }
        }
        Ok(())
    }

    fn local_id(&self) -> u64 {
        self.endpoint_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;

    #[tokio::test]
    async fn delivers_to_other_subscribers_only() {
        let hub = MemoryHub::new();
        let topic = Topic::new("room-42").unwrap();
        let a = hub.endpoint();
        let b = hub.endpoint();

        let mut sub_a = a.subscribe(&topic).await.unwrap();
        let mut sub_b = b.subscribe(&topic).await.unwrap();

        a.publish(&topic, Bytes::from_static(b"OFFER:abc")).await.unwrap();
        assert_eq!(sub_b.next().await.unwrap(), Bytes::from_static(b"OFFER:abc"));

        b.publish(&topic, Bytes::from_static(b"ANSWER:xyz")).await.unwrap();
        assert_eq!(sub_a.next().await.unwrap(), Bytes::from_static(b"ANSWER:xyz"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let _sub = b.subscribe(&Topic::new("room-1").unwrap()).await.unwrap();

        a.publish(&Topic::new("room-2").unwrap(), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(hub.subscriber_count(&Topic::new("room-2").unwrap()).await, 0);
        assert_eq!(hub.subscriber_count(&Topic::new("room-1").unwrap()).await, 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let topic = Topic::new("room-42").unwrap();

        a.fail_next_subscribes(2);
        assert!(a.subscribe(&topic).await.is_err());
        assert!(a.subscribe(&topic).await.is_err());
        assert!(a.subscribe(&topic).await.is_ok());
        assert_eq!(a.subscribe_attempts(), 3);

        a.fail_next_publishes(1);
        assert!(a.publish(&topic, Bytes::new()).await.is_err());
        assert!(a.publish(&topic, Bytes::new()).await.is_ok());
        assert_eq!(a.publish_attempts(), 2);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let topic = Topic::new("room-42").unwrap();

        let sub = b.subscribe(&topic).await.unwrap();
        assert_eq!(hub.subscriber_count(&topic).await, 1);
        drop(sub);
        a.publish(&topic, Bytes::new()).await.unwrap();
        assert_eq!(hub.subscriber_count(&topic).await, 0);
    }
}
