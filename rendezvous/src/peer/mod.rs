//! Peer session abstraction the controller drives.
//!
//! The controller only needs the negotiation primitives: produce an offer,
//! apply a remote payload (which may yield a reply), add local tracks, and
//! observe what the transport reports. [`webrtc::WebRtcConnector`] provides
//! them on top of webrtc-rs.

use crate::chat::{ChatEvent, SideChannel};
use crate::error::Result;
use crate::media::{LocalTrack, TrackKind};
use crate::protocol::SignalingMessage;
use crate::session::Role;
use std::sync::Arc;
use tokio::sync::mpsc;

#[cfg(test)]
pub(crate) mod mock;
pub mod webrtc;

/// Connectivity state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A remote track that arrived during negotiation.
#[derive(Debug, Clone)]
pub struct RemoteTrackEvent<R> {
    pub kind: TrackKind,
    pub stream: R,
}

/// Notifications a peer sends to its controller.
#[derive(Debug)]
pub enum PeerEvent<R> {
    /// A locally produced negotiation payload (such as an ICE candidate) to publish
    LocalSignal(SignalingMessage),
    RemoteTrack(RemoteTrackEvent<R>),
    /// A remote track of the given kind ended
    TrackRemoved(TrackKind),
    Transport(TransportState),
    Chat(ChatEvent),
}

/// Creates peer sessions.
pub trait Connector: Send + Sync + 'static {
    type Peer: Peer;

    /// Creates a peer configured with the given connectivity servers.
    ///
    /// Events are delivered on `events` until the peer is closed.
    fn connect(
        &self,
        ice_servers: &[String],
        role: Role,
        events: mpsc::UnboundedSender<PeerEvent<<Self::Peer as Peer>::RemoteStream>>,
    ) -> impl std::future::Future<Output = Result<Self::Peer>> + Send;
}

/// One negotiated peer session.
pub trait Peer: Send + Sync + 'static {
    /// Handle to a remote media stream, handed to rendering sinks
    type RemoteStream: Clone + Send + Sync + 'static;
    type Channel: SideChannel;

    fn add_track(
        &self,
        track: Arc<LocalTrack>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Creates the local offer and returns it as a payload to publish.
    fn create_offer(&self) -> impl std::future::Future<Output = Result<SignalingMessage>> + Send;

    /// Applies a remote payload, returning a reply to publish if one is due.
    fn apply_remote(
        &self,
        payload: SignalingMessage,
    ) -> impl std::future::Future<Output = Result<Option<SignalingMessage>>> + Send;

    /// The chat side channel of this session.
    fn side_channel(&self) -> Self::Channel;

    fn close(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}
