use crate::chat::{ChatEvent, SideChannel};
use crate::error::{RendezvousError, Result, SignalingError};
use crate::media::{LocalTrack, TrackKind};
use crate::peer::{Connector, Peer, PeerEvent, RemoteTrackEvent, TransportState};
use crate::protocol::constants::CHAT_CHANNEL;
use crate::protocol::{NegotiationMessage, SignalingMessage};
use crate::session::Role;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, watch};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type Events = mpsc::UnboundedSender<PeerEvent<Arc<TrackRemote>>>;
type ChatSlot = Arc<watch::Sender<Option<Arc<RTCDataChannel>>>>;

/// Creates webrtc-rs peer connections.
#[derive(Debug, Clone, Default)]
pub struct WebRtcConnector {
    _private: (),
}

impl WebRtcConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for WebRtcConnector {
    type Peer = WebRtcPeer;

    async fn connect(&self, ice_servers: &[String], role: Role, events: Events) -> Result<WebRtcPeer> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        // IPv6 link-local addresses (fe80::/10) fail to bind on Linux
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ip_filter(Box::new(|ip| match ip {
            std::net::IpAddr::V6(v6) => {
                let octets = v6.octets();
                !(octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80)
            }
            _ => true,
        }));

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);
        let (chat_tx, chat_rx) = watch::channel(None);
        let chat_slot: ChatSlot = Arc::new(chat_tx);

        let events_clone = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events_clone.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate
                    .to_json()
                    .map_err(RendezvousError::from)
                    .and_then(|init| NegotiationMessage::Candidate(init).encode())
                {
                    Ok(payload) => {
                        let _ = events.send(PeerEvent::LocalSignal(payload));
                    }
                    Err(e) => tracing::warn!("failed to encode local candidate: {}", e),
                }
            })
        }));

        let events_clone = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events_clone.clone();
            Box::pin(async move {
                tracing::debug!("Peer connection state changed to {}", state);
                let state = match state {
                    RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                        TransportState::New
                    }
                    RTCPeerConnectionState::Connecting => TransportState::Connecting,
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                };
                let _ = events.send(PeerEvent::Transport(state));
            })
        }));

        let events_clone = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events_clone.clone();
                Box::pin(async move {
                    let Some(kind) = TrackKind::from_codec_type(track.kind()) else {
                        tracing::debug!("Ignoring remote track {} of unknown kind", track.id());
                        return;
                    };
                    tracing::debug!("Remote {} track {} arrived", kind, track.id());
                    let _ = events.send(PeerEvent::RemoteTrack(RemoteTrackEvent {
                        kind,
                        stream: track,
                    }));

                    let read_rtcp = move || {
                        let receiver = receiver.clone();
                        async move { receiver.read_rtcp().await.map(|_| ()) }
                    };
                    tokio::spawn(report_track_end(kind, read_rtcp, events));
                })
            },
        ));

        let events_clone = events.clone();
        let slot_clone = chat_slot.clone();
        peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let events = events_clone.clone();
            let slot = slot_clone.clone();
            Box::pin(async move {
                if channel.label() == CHAT_CHANNEL {
                    wire_chat(&channel, slot, events);
                } else {
                    tracing::debug!("Ignoring data channel {}", channel.label());
                }
            })
        }));

        if role == Role::Offerer {
            let channel = peer_connection
                .create_data_channel(
                    CHAT_CHANNEL,
                    Some(RTCDataChannelInit {
                        ordered: Some(true),
                        ..Default::default()
                    }),
                )
                .await?;
            wire_chat(&channel, chat_slot.clone(), events.clone());
        }

        Ok(WebRtcPeer {
            peer_connection,
            role,
            chat: WebRtcSideChannel { slot: chat_rx },
            chat_slot,
            pending_candidates: Mutex::new(Vec::new()),
        })
    }
}

fn wire_chat(channel: &Arc<RTCDataChannel>, slot: ChatSlot, events: Events) {
    let weak: Weak<RTCDataChannel> = Arc::downgrade(channel);
    let open_slot = slot.clone();
    let open_events = events.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            if let Some(channel) = weak.upgrade() {
                tracing::debug!("Chat channel opened");
                open_slot.send_replace(Some(channel));
                let _ = open_events.send(PeerEvent::Chat(ChatEvent::Opened));
            }
        })
    }));

    let close_events = events.clone();
    channel.on_close(Box::new(move || {
        let slot = slot.clone();
        let events = close_events.clone();
        Box::pin(async move {
            slot.send_replace(None);
            let _ = events.send(PeerEvent::Chat(ChatEvent::Closed));
        })
    }));

    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            if !msg.is_string {
                tracing::debug!("Ignoring binary chat message of {} bytes", msg.data.len());
                return;
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(PeerEvent::Chat(ChatEvent::Message(text)));
                }
                Err(e) => tracing::warn!("invalid UTF-8 in chat message: {}", e),
            }
        })
    }));
}

/// Chat side channel backed by an `RTCDataChannel`.
#[derive(Clone)]
pub struct WebRtcSideChannel {
    slot: watch::Receiver<Option<Arc<RTCDataChannel>>>,
}

impl SideChannel for WebRtcSideChannel {
    fn is_open(&self) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_some_and(|channel| channel.ready_state() == RTCDataChannelState::Open)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let channel = self
            .slot
            .borrow()
            .clone()
            .ok_or_else(|| RendezvousError::DataChannel("chat channel not open".to_string()))?;
        channel
            .send_text(text)
            .await
            .map_err(|e| RendezvousError::DataChannel(e.to_string()))?;
        Ok(())
    }
}

/// A webrtc-rs peer connection driven by a session controller.
pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    role: Role,
    chat: WebRtcSideChannel,
    chat_slot: ChatSlot,
    // Remote candidates that arrived before the remote description
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcPeer {
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        self.peer_connection.clone()
    }

    async fn flush_pending_candidates(&self) {
        let pending = std::mem::take(&mut *self.pending_candidates.lock().await);
        if !pending.is_empty() {
            tracing::debug!("Applying {} buffered remote candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
                tracing::warn!("failed to add buffered candidate: {}", e);
            }
        }
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }
}

impl Peer for WebRtcPeer {
    type RemoteStream = Arc<TrackRemote>;
    type Channel = WebRtcSideChannel;

    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<()> {
        let rtc_track: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
        let sender = self.peer_connection.add_track(rtc_track).await?;

        // Drain RTCP so interceptors (NACK, reports) keep running
        tokio::spawn(async move { while sender.read_rtcp().await.is_ok() {} });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SignalingMessage> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        NegotiationMessage::Description(offer).encode()
    }

    async fn apply_remote(&self, payload: SignalingMessage) -> Result<Option<SignalingMessage>> {
        let message = NegotiationMessage::parse(&payload)?;
        tracing::debug!("Applying remote {}", message.message_type());

        match message {
            NegotiationMessage::Description(desc) => match (desc.sdp_type, self.role) {
                (RTCSdpType::Offer, Role::Answerer) => {
                    if self.has_remote_description().await {
                        tracing::debug!("Ignoring repeated offer");
                        return Ok(None);
                    }
                    self.peer_connection.set_remote_description(desc).await?;
                    self.flush_pending_candidates().await;

                    let answer = self.peer_connection.create_answer(None).await?;
                    self.peer_connection
                        .set_local_description(answer.clone())
                        .await?;
                    Ok(Some(NegotiationMessage::Description(answer).encode()?))
                }
                (RTCSdpType::Answer, Role::Offerer) => {
                    if self.has_remote_description().await {
                        tracing::debug!("Ignoring repeated answer");
                        return Ok(None);
                    }
                    self.peer_connection.set_remote_description(desc).await?;
                    self.flush_pending_candidates().await;
                    Ok(None)
                }
                (sdp_type, role) => Err(SignalingError::InvalidSignal(format!(
                    "unexpected {} description for {:?}",
                    sdp_type, role
                ))
                .into()),
            },
            NegotiationMessage::Candidate(candidate) => {
                if !self.has_remote_description().await {
                    self.pending_candidates.lock().await.push(candidate);
                    return Ok(None);
                }
                self.peer_connection.add_ice_candidate(candidate).await?;
                Ok(None)
            }
        }
    }

    fn side_channel(&self) -> WebRtcSideChannel {
        self.chat.clone()
    }

    async fn close(&self) -> Result<()> {
        let channel = self.chat_slot.send_replace(None);
        if let Some(channel) = channel {
            let _ = channel.close().await;
        }
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Drains a receiver's RTCP and reports `kind` as removed once it ends.
///
/// webrtc has no per-track end event. The RTCP stream of a receiver ends when
/// the remote side stops its transceiver or the transport shuts down, so a
/// remote hangup and a dead connection both surface as `TrackRemoved`.
async fn report_track_end<S, F, Fut, E>(
    kind: TrackKind,
    mut read_rtcp: F,
    events: mpsc::UnboundedSender<PeerEvent<S>>,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), E>>,
{
    while read_rtcp().await.is_ok() {}
    tracing::debug!("Remote {} track ended", kind);
    let _ = events.send(PeerEvent::TrackRemoved(kind));
}
