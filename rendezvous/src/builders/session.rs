use std::time::Duration;

use crate::error::Result;
use crate::session::{Role, SessionConfig};

/// Configuration builder for [`crate::SessionController`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    role: Role,
    ice_servers: Vec<String>,
    acquire_timeout: Duration,
    envelope: bool,
}

impl Default for SessionConfigBuilder {
    /// Creates a [`SessionConfigBuilder`] pre-populated with the default session settings.
    fn default() -> Self {
        let config = SessionConfig::default();
        Self {
            role: config.role,
            ice_servers: config.ice_servers,
            acquire_timeout: config.acquire_timeout,
            envelope: config.envelope,
        }
    }
}

impl TryFrom<SessionConfigBuilder> for SessionConfig {
    type Error = crate::RendezvousError;

    fn try_from(builder: SessionConfigBuilder) -> Result<Self> {
        builder.build()
    }
}

impl SessionConfigBuilder {
    /// Creates a new [`SessionConfigBuilder`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Replaces the connectivity servers with `servers`.
    pub fn ice_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets how long media acquisition may stay pending.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Wraps signaling payloads in an envelope and drops duplicates.
    ///
    /// Both endpoints must agree on this setting.
    pub fn envelope(mut self, enabled: bool) -> Self {
        self.envelope = enabled;
        self
    }

    /// Constructs a validated [`SessionConfig`].
    pub fn build(self) -> Result<SessionConfig> {
        let config = SessionConfig {
            role: self.role,
            ice_servers: self.ice_servers,
            acquire_timeout: self.acquire_timeout,
            envelope: self.envelope,
        };
        config.validate()?;
        Ok(config)
    }
}
