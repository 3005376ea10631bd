use crate::chat::ChatEvent;
use crate::error::{RendezvousError, Result};
use crate::media::TrackKind;
use crate::protocol::constants::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_ICE_SERVER};
use std::time::Duration;

mod controller;
mod machine;

pub use controller::{SessionController, SessionHandle};
pub use machine::{MachineEvent, SessionMachine, SessionState};

/// Which side of the offer/answer exchange the local endpoint takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Publishes the offer once the channel is subscribed
    Offerer,
    /// Waits for a remote offer and publishes the answer
    Answerer,
}

/// Configuration for [`SessionController`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,
    /// Connectivity servers (STUN/TURN URLs) handed to the peer
    pub ice_servers: Vec<String>,
    /// How long media acquisition may take before it is reported as failed
    pub acquire_timeout: Duration,
    /// Wrap signaling payloads in an [`crate::Envelope`] and drop duplicates
    pub envelope: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Offerer,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            envelope: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ice_servers.is_empty() {
            return Err(RendezvousError::InvalidConfig(
                "at least one ICE server is required".to_string(),
            ));
        }
        if self.ice_servers.iter().any(|url| url.trim().is_empty()) {
            return Err(RendezvousError::InvalidConfig(
                "ICE server URLs must not be empty".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(RendezvousError::InvalidConfig(
                "acquire_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a running session reports to its caller.
#[derive(Debug)]
pub enum SessionEvent {
    State(SessionState),
    /// A remote track of this kind is now bound to its sink
    RemoteTrack(TrackKind),
    Chat(ChatEvent),
    /// A failure the caller should know about; `NegotiationFailed` is terminal
    Error(RendezvousError),
}
