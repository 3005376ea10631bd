//! Rendezvous channel: one pub/sub topic shared by both endpoints.
//!
//! Subscribing retries at a fixed delay until it succeeds. Publishing is
//! best-effort and, unless a [`RetryPolicy`] is configured, is attempted once.
//! Both retry loops stop when the channel is closed or dropped.

use crate::error::{RendezvousError, Result, SignalingError};
use crate::protocol::constants::DEFAULT_SUBSCRIBE_RETRY_DELAY;
use crate::protocol::{SignalingMessage, Topic};
use crate::pubsub::PubSub;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Subscription progress of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Unsubscribed,
    /// Subscribe attempts are in flight or waiting for the next retry
    Subscribing,
    Subscribed,
}

/// Exponential backoff applied to publish failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after `current`, capped at `max_backoff`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(self.max_backoff, |next| next.min(self.max_backoff))
    }
}

/// Configuration for [`RendezvousChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Delay between failed subscribe attempts
    pub retry_delay: Duration,
    /// Retry policy for publish; `None` makes a single attempt
    pub publish_retry: Option<RetryPolicy>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_SUBSCRIBE_RETRY_DELAY,
            publish_retry: None,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry_delay.is_zero() {
            return Err(RendezvousError::InvalidConfig(
                "retry_delay must be non-zero".to_string(),
            ));
        }
        if let Some(policy) = &self.publish_retry {
            if policy.max_attempts == 0 {
                return Err(RendezvousError::InvalidConfig(
                    "publish_retry.max_attempts must be at least 1".to_string(),
                ));
            }
            if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
                return Err(RendezvousError::InvalidConfig(
                    "publish_retry.multiplier must be finite and >= 1.0".to_string(),
                ));
            }
            if policy.initial_backoff > policy.max_backoff {
                return Err(RendezvousError::InvalidConfig(
                    "publish_retry.initial_backoff must not exceed max_backoff".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Receiving side of a subscription.
///
/// Messages arrive in the order the medium delivered them, which is not
/// necessarily the order they were published in.
pub struct Inbound {
    messages: mpsc::UnboundedReceiver<SignalingMessage>,
    subscribed: Option<oneshot::Receiver<()>>,
}

impl Inbound {
    /// Receives the next inbound message, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.messages.recv().await
    }

    /// Waits until the subscription has succeeded.
    ///
    /// Resolves immediately if completion was already observed. Fails if the
    /// channel is closed before any subscribe attempt succeeds.
    pub async fn subscribed(&mut self) -> Result<()> {
        match self.subscribed.take() {
            Some(rx) => rx.await.map_err(|_| RendezvousError::ConnectionClosed),
            None => Ok(()),
        }
    }

    /// Splits into the completion signal and the message queue.
    pub fn into_parts(
        self,
    ) -> (
        Option<oneshot::Receiver<()>>,
        mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        (self.subscribed, self.messages)
    }
}

/// A publish/subscribe topic used to exchange signaling messages.
pub struct RendezvousChannel<P> {
    pubsub: Arc<P>,
    topic: Topic,
    config: ChannelConfig,
    status: Arc<watch::Sender<SubscriptionStatus>>,
    session_active: AtomicBool,
    cancel_token: CancellationToken,
}

impl<P: PubSub + 'static> RendezvousChannel<P> {
    pub fn new(pubsub: Arc<P>, topic: Topic) -> Self {
        Self::build(pubsub, topic, ChannelConfig::default())
    }

    pub fn with_config(pubsub: Arc<P>, topic: Topic, config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(pubsub, topic, config))
    }

    fn build(pubsub: Arc<P>, topic: Topic, config: ChannelConfig) -> Self {
        Self {
            pubsub,
            topic,
            config,
            status: Arc::new(watch::channel(SubscriptionStatus::Unsubscribed).0),
            session_active: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Returns the local endpoint ID of the underlying medium
    pub fn local_id(&self) -> u64 {
        self.pubsub.local_id()
    }

    /// Watches the subscription status.
    pub fn status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Starts listening on the topic.
    ///
    /// Failed attempts are retried every `retry_delay` until one succeeds or the
    /// channel is closed. Calling this again while subscribing or subscribed
    /// fails with [`SignalingError::AlreadySubscribed`].
    pub fn subscribe(&self) -> Result<Inbound> {
        if self.is_closed() {
            return Err(RendezvousError::ConnectionClosed);
        }

        let mut claimed = false;
        self.status.send_if_modified(|status| {
            if *status == SubscriptionStatus::Unsubscribed {
                *status = SubscriptionStatus::Subscribing;
                claimed = true;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(SignalingError::AlreadySubscribed(self.topic.to_string()).into());
        }

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let pubsub = self.pubsub.clone();
        let topic = self.topic.clone();
        let status = self.status.clone();
        let retry_delay = self.config.retry_delay;
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            let subscription = tokio::select! {
                _ = cancel_token.cancelled() => None,
                sub = Self::subscribe_with_retry(&*pubsub, &topic, retry_delay, &cancel_token) => sub,
            };
            let Some(mut subscription) = subscription else {
                status.send_replace(SubscriptionStatus::Unsubscribed);
                return;
            };

            status.send_replace(SubscriptionStatus::Subscribed);
            let _ = done_tx.send(());
            tracing::debug!("Subscribed to {}", topic);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    msg = subscription.next() => match msg {
                        Some(msg) => {
                            if msg_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        None => {
                            tracing::debug!("Subscription to {} ended", topic);
                            break;
                        }
                    }
                }
            }

            status.send_replace(SubscriptionStatus::Unsubscribed);
        });

        Ok(Inbound {
            messages: msg_rx,
            subscribed: Some(done_rx),
        })
    }

    async fn subscribe_with_retry(
        pubsub: &P,
        topic: &Topic,
        retry_delay: Duration,
        cancel_token: &CancellationToken,
    ) -> Option<crate::pubsub::Subscription> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match pubsub.subscribe(topic).await {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    tracing::warn!(
                        "Subscribe to {} failed (attempt {}), retrying in {:?}: {}",
                        topic,
                        attempt,
                        retry_delay,
                        e
                    );
                }
            }

            tokio::select! {
                _ = cancel_token.cancelled() => return None,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }

    /// Publishes a payload to the topic.
    ///
    /// Without a retry policy a failure is logged and returned as is. With one,
    /// failed attempts are retried with exponential backoff and the last error
    /// is reported as [`SignalingError::PublishFailed`].
    pub async fn publish(&self, payload: SignalingMessage) -> Result<()> {
        if self.is_closed() {
            return Err(RendezvousError::ConnectionClosed);
        }

        let Some(policy) = &self.config.publish_retry else {
            return self
                .pubsub
                .publish(&self.topic, payload)
                .await
                .inspect_err(|e| tracing::warn!("Publish to {} failed: {}", self.topic, e));
        };

        let mut backoff = policy.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.pubsub.publish(&self.topic, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if attempt >= policy.max_attempts {
                tracing::warn!(
                    "Publish to {} failed after {} attempts: {}",
                    self.topic,
                    attempt,
                    err
                );
                return Err(SignalingError::PublishFailed {
                    topic: self.topic.to_string(),
                    attempts: attempt,
                    reason: err.to_string(),
                }
                .into());
            }

            tracing::debug!(
                "Publish to {} failed (attempt {}), retrying in {:?}: {}",
                self.topic,
                attempt,
                backoff,
                err
            );
            tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(RendezvousError::ConnectionClosed),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = policy.next_backoff(backoff);
        }
    }

    /// Stops the subscribe retry loop, the inbound pump and pending publish retries.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    /// Marks the channel as driving a session.
    pub(crate) fn claim_session(&self) -> Result<()> {
        self.session_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RendezvousError::SessionActive(self.topic.to_string()))
    }

    pub(crate) fn release_session(&self) {
        self.session_active.store(false, Ordering::Release);
    }
}

impl<P> Drop for RendezvousChannel<P> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
