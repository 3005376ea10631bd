use std::time::Duration;

use crate::channel::{ChannelConfig, RetryPolicy};
use crate::error::Result;

/// Configuration builder for [`crate::RendezvousChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfigBuilder {
    retry_delay: Duration,
    publish_retry: Option<RetryPolicy>,
}

impl Default for ChannelConfigBuilder {
    /// Creates a [`ChannelConfigBuilder`] pre-populated with the default channel settings.
    fn default() -> Self {
        let config = ChannelConfig::default();
        Self {
            retry_delay: config.retry_delay,
            publish_retry: config.publish_retry,
        }
    }
}

impl TryFrom<ChannelConfigBuilder> for ChannelConfig {
    type Error = crate::RendezvousError;

    fn try_from(builder: ChannelConfigBuilder) -> Result<Self> {
        builder.build()
    }
}

impl ChannelConfigBuilder {
    /// Creates a new [`ChannelConfigBuilder`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay between failed subscribe attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Retries failed publishes according to `policy`.
    ///
    /// Without a policy a publish is attempted once.
    pub fn publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = Some(policy);
        self
    }

    /// Retries failed publishes up to `max_attempts` times with the default backoff.
    pub fn publish_attempts(mut self, max_attempts: u32) -> Self {
        let policy = self.publish_retry.take().unwrap_or_default();
        self.publish_retry = Some(RetryPolicy {
            max_attempts,
            ..policy
        });
        self
    }

    /// Constructs a validated [`ChannelConfig`].
    pub fn build(self) -> Result<ChannelConfig> {
        let config = ChannelConfig {
            retry_delay: self.retry_delay,
            publish_retry: self.publish_retry,
        };
        config.validate()?;
        Ok(config)
    }
}
