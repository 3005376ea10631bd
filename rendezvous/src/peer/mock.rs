//! Scripted peers for exercising the session layer without network I/O.
//!
//! The offerer offers `OFFER:abc`, the answerer replies `ANSWER:xyz`, and each
//! side reports a connected transport and an open chat channel once it has
//! applied the other's description. Chat text is relayed between the two.

use crate::chat::{ChatEvent, SideChannel};
use crate::error::{Result, SignalingError};
use crate::media::LocalTrack;
use crate::peer::{Connector, Peer, PeerEvent, RemoteTrackEvent, TransportState};
use crate::protocol::SignalingMessage;
use crate::session::Role;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) const OFFER: &[u8] = b"OFFER:abc";
pub(crate) const ANSWER: &[u8] = b"ANSWER:xyz";

type Events = mpsc::UnboundedSender<PeerEvent<String>>;

#[derive(Default)]
pub(crate) struct MockPeerState {
    applied: Mutex<Vec<Bytes>>,
    added: Mutex<Vec<String>>,
    ice_servers: Mutex<Vec<String>>,
    chat_open: AtomicBool,
    closed: AtomicBool,
}

impl MockPeerState {
    pub(crate) fn applied(&self) -> Vec<Bytes> {
        self.applied.lock().unwrap().clone()
    }

    pub(crate) fn added_tracks(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub(crate) fn ice_servers(&self) -> Vec<String> {
        self.ice_servers.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Endpoint {
    state: Arc<MockPeerState>,
    events: Option<Events>,
}

#[derive(Default)]
struct WireInner {
    endpoints: Mutex<HashMap<Role, Endpoint>>,
    remote_tracks: Mutex<Vec<RemoteTrackEvent<String>>>,
}

/// Connects one offerer and one answerer.
#[derive(Clone, Default)]
pub(crate) struct MockWire {
    inner: Arc<WireInner>,
}

impl MockWire {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Remote tracks each side reports once connected.
    pub(crate) fn with_remote_tracks(self, tracks: Vec<RemoteTrackEvent<String>>) -> Self {
        *self.inner.remote_tracks.lock().unwrap() = tracks;
        self
    }

    pub(crate) fn connector(&self) -> MockConnector {
        MockConnector { wire: self.clone() }
    }

    /// A peer whose events are discarded.
    pub(crate) fn peer(&self, role: Role) -> MockPeer {
        let (tx, _rx) = mpsc::unbounded_channel();
        self.register(role, tx)
    }

    pub(crate) fn state(&self, role: Role) -> Arc<MockPeerState> {
        self.inner
            .endpoints
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .state
            .clone()
    }

    /// Injects an event as if `role`'s transport had produced it.
    pub(crate) fn emit(&self, role: Role, event: PeerEvent<String>) {
        let endpoints = self.inner.endpoints.lock().unwrap();
        if let Some(tx) = endpoints.get(&role).and_then(|e| e.events.as_ref()) {
            let _ = tx.send(event);
        }
    }

    fn register(&self, role: Role, events: Events) -> MockPeer {
        let mut endpoints = self.inner.endpoints.lock().unwrap();
        let endpoint = endpoints.entry(role).or_default();
        endpoint.events = Some(events);
        MockPeer {
            role,
            state: endpoint.state.clone(),
            wire: self.clone(),
        }
    }

    fn connected(&self, role: Role) {
        let tracks = self.inner.remote_tracks.lock().unwrap().clone();
        self.state(role).chat_open.store(true, Ordering::SeqCst);
        self.emit(role, PeerEvent::Transport(TransportState::Connecting));
        self.emit(role, PeerEvent::Transport(TransportState::Connected));
        for track in tracks {
            self.emit(role, PeerEvent::RemoteTrack(track));
        }
        self.emit(role, PeerEvent::Chat(ChatEvent::Opened));
    }
}

pub(crate) struct MockConnector {
    wire: MockWire,
}

impl Connector for MockConnector {
    type Peer = MockPeer;

    async fn connect(&self, ice_servers: &[String], role: Role, events: Events) -> Result<MockPeer> {
        *self.wire.state(role).ice_servers.lock().unwrap() = ice_servers.to_vec();
        Ok(self.wire.register(role, events))
    }
}

pub(crate) struct MockPeer {
    role: Role,
    state: Arc<MockPeerState>,
    wire: MockWire,
}

impl Peer for MockPeer {
    type RemoteStream = String;
    type Channel = MockSideChannel;

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        self.state.added.lock().unwrap().push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SignalingMessage> {
        Ok(Bytes::from_static(OFFER))
    }

    async fn apply_remote(&self, payload: SignalingMessage) -> Result<Option<SignalingMessage>> {
        self.state.applied.lock().unwrap().push(payload.clone());
        match (self.role, &payload[..]) {
            (Role::Answerer, OFFER) => {
                self.wire.connected(Role::Answerer);
                Ok(Some(Bytes::from_static(ANSWER)))
            }
            (Role::Offerer, ANSWER) => {
                self.wire.connected(Role::Offerer);
                Ok(None)
            }
            _ => Err(SignalingError::InvalidSignal(format!(
                "{:?} cannot apply {:?}",
                self.role, payload
            ))
            .into()),
        }
    }

    fn side_channel(&self) -> MockSideChannel {
        MockSideChannel {
            role: self.role,
            wire: self.wire.clone(),
        }
    }

    async fn close(&self) -> Result<()> {
        self.state.chat_open.store(false, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct MockSideChannel {
    role: Role,
    wire: MockWire,
}

impl SideChannel for MockSideChannel {
    fn is_open(&self) -> bool {
        self.wire.state(self.role).chat_open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let remote = match self.role {
            Role::Offerer => Role::Answerer,
            Role::Answerer => Role::Offerer,
        };
        if self.wire.state(remote).chat_open.load(Ordering::SeqCst) {
            self.wire.emit(remote, PeerEvent::Chat(ChatEvent::Message(text)));
        }
        Ok(())
    }
}
