//! Tokio-based serverless signaling for WebRTC sessions.
//!
//! Two endpoints that share a context value (typically the fragment of a link)
//! derive the same pub/sub [`Topic`] and negotiate a direct peer session over it:
//! - [`RendezvousChannel`] for subscribing (with retry) and publishing signaling messages
//! - [`SessionController`] for driving offer/answer and observing connection state
//! - [`TrackBinder`] for routing local and remote media tracks to rendering sinks
//! - [`ChatChannel`] for text chat over the session's reliable data channel
//! - [`PubSub`] trait and implementations (in-process hub, LAN broadcast)
//!
//! ## Features
//!
//! - Subscribe retry at a fixed delay with deterministic cancellation
//! - Best-effort publish, with an opt-in bounded retry policy
//! - Explicit session state machine (`Idle → Negotiating → Connected → Closed`, plus `Failed`)
//! - Optional message envelope for de-duplication across noisy topics
//! - LAN transport authenticated and encrypted with a topic-derived key

pub mod binder;
pub mod builders;
pub mod channel;
pub mod chat;
pub mod error;
pub mod media;
pub mod peer;
pub mod protocol;
pub mod pubsub;
pub mod session;

pub use binder::{MediaSink, Sinks, StreamHandle, TrackBinder};
pub use builders::{ChannelConfigBuilder, SessionConfigBuilder};
pub use channel::{ChannelConfig, Inbound, RendezvousChannel, RetryPolicy, SubscriptionStatus};
pub use chat::{ChatChannel, ChatEvent, SideChannel};
pub use error::{RendezvousError, Result, SignalingError};
pub use media::{
    LocalTrack, LocalTrackSet, MediaConstraints, MediaDevices, SampleDevices, TrackKind,
    acquire_with_timeout,
};
pub use peer::webrtc::{WebRtcConnector, WebRtcPeer, WebRtcSideChannel};
pub use peer::{Connector, Peer, PeerEvent, RemoteTrackEvent, TransportState};
pub use protocol::{Deduplicator, Envelope, EnvelopeKind, NegotiationMessage, SignalingMessage, Topic};
pub use pubsub::{LanConfig, LanPubSub, MemoryHub, MemoryPubSub, PubSub, Subscription};
pub use session::{
    MachineEvent, Role, SessionConfig, SessionController, SessionEvent, SessionHandle,
    SessionMachine, SessionState,
};
