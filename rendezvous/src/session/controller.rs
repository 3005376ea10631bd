use super::machine::{MachineEvent, SessionMachine, SessionState};
use super::{Role, SessionConfig, SessionEvent};
use crate::binder::{Sinks, TrackBinder};
use crate::channel::{Inbound, RendezvousChannel};
use crate::chat::{ChatChannel, SideChannel};
use crate::error::{RendezvousError, Result, SignalingError};
use crate::media::{LocalTrackSet, MediaConstraints, MediaDevices, acquire_with_timeout};
use crate::peer::{Connector, Peer, PeerEvent, TransportState};
use crate::protocol::{Deduplicator, Envelope, EnvelopeKind, SignalingMessage};
use crate::pubsub::PubSub;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const HANGUP_TIMEOUT: Duration = Duration::from_secs(1);

type RemoteStream<C> = <<C as Connector>::Peer as Peer>::RemoteStream;
type SideChannelOf<C> = <<C as Connector>::Peer as Peer>::Channel;

/// Drives one peer session over a rendezvous channel.
///
/// The controller creates the peer, attaches local tracks, subscribes the
/// channel and hands everything to a driver task that owns the session from
/// then on. The caller observes and controls it through a [`SessionHandle`].
pub struct SessionController<C, P> {
    connector: C,
    channel: Arc<RendezvousChannel<P>>,
    config: SessionConfig,
}

impl<C: Connector, P: PubSub + 'static> SessionController<C, P> {
    pub fn new(connector: C, channel: Arc<RendezvousChannel<P>>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            channel,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Acquires local media and starts a session with it.
    ///
    /// Acquisition failures, including timeouts, are returned as
    /// [`RendezvousError::MediaAcquisition`].
    pub async fn start_with_devices<D: MediaDevices>(
        &self,
        devices: &D,
        constraints: MediaConstraints,
        sinks: Sinks<RemoteStream<C>>,
    ) -> Result<SessionHandle<SideChannelOf<C>>> {
        let tracks = acquire_with_timeout(devices, constraints, self.config.acquire_timeout).await?;
        self.start(tracks, sinks).await
    }

    /// Starts a session with the given local tracks.
    ///
    /// The session takes ownership of the tracks and stops them when it ends,
    /// or right away if it cannot start. Only one session may run on a channel
    /// at a time; a second start fails with [`RendezvousError::SessionActive`].
    pub async fn start(
        &self,
        tracks: LocalTrackSet,
        sinks: Sinks<RemoteStream<C>>,
    ) -> Result<SessionHandle<SideChannelOf<C>>> {
        if let Err(e) = self.channel.claim_session() {
            tracks.stop();
            return Err(e);
        }

        match self.launch(tracks.clone(), sinks).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                tracing::warn!("Failed to start session on {}: {}", self.channel.topic(), e);
                tracks.stop();
                self.channel.release_session();
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        tracks: LocalTrackSet,
        sinks: Sinks<RemoteStream<C>>,
    ) -> Result<SessionHandle<SideChannelOf<C>>> {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let peer = self
            .connector
            .connect(&self.config.ice_servers, self.config.role, peer_tx)
            .await?;

        let mut machine = SessionMachine::new();
        let mut binder = TrackBinder::new(sinks);
        let setup: Result<Inbound> = async {
            binder.attach_local(&peer, &tracks).await?;
            machine.apply(MachineEvent::TracksAttached)?;
            self.channel.subscribe()
        }
        .await;
        let inbound = match setup {
            Ok(inbound) => inbound,
            Err(e) => {
                if let Err(close_err) = peer.close().await {
                    tracing::debug!("Failed to close peer: {}", close_err);
                }
                return Err(e);
            }
        };

        let (state_tx, state_rx) = watch::channel(machine.state());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let chat = ChatChannel::new(peer.side_channel());

        let envelope = self.config.envelope.then(|| EnvelopeState {
            local_id: self.channel.local_id(),
            next_seq: 0,
            dedup: Deduplicator::new(self.channel.local_id()),
        });

        let driver = SessionDriver {
            peer,
            channel: self.channel.clone(),
            role: self.config.role,
            machine,
            binder,
            tracks,
            envelope,
            report_publish_errors: self.channel.config().publish_retry.is_some(),
            state_tx,
            event_tx,
        };

        tracing::info!(
            "Starting session on {} as {:?}",
            self.channel.topic(),
            self.config.role
        );
        let task = tokio::spawn(driver.run(inbound, peer_rx, cancel_token.clone()));

        Ok(SessionHandle {
            state: state_rx,
            events: event_rx,
            chat,
            cancel_token,
            task: Some(task),
        })
    }
}

/// Caller's view of a running session.
///
/// Dropping the handle closes the session.
pub struct SessionHandle<Ch> {
    state: watch::Receiver<SessionState>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    chat: ChatChannel<Ch>,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<Ch: SideChannel> SessionHandle<Ch> {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Next session event, or `None` once the session has ended and all
    /// events were consumed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn chat(&self) -> &ChatChannel<Ch> {
        &self.chat
    }

    /// Sends chat text; returns `Ok(false)` if the side channel is not open yet.
    pub async fn send_chat(&self, text: &str) -> Result<bool> {
        self.chat.send(text).await
    }

    /// Asks the session to close. Tracks are stopped and the peer released.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    /// Waits for the session to end and returns its final state.
    pub async fn closed(&mut self) -> SessionState {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }
        *self.state.borrow()
    }
}

impl<Ch> Drop for SessionHandle<Ch> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct EnvelopeState {
    local_id: u64,
    next_seq: u64,
    dedup: Deduplicator,
}

impl EnvelopeState {
    fn wrap(&mut self, kind: EnvelopeKind, payload: SignalingMessage) -> SignalingMessage {
        let envelope = Envelope::new(kind, self.local_id, self.next_seq, payload);
        self.next_seq += 1;
        envelope.encode()
    }
}

/// What an inbound message asks the driver to do.
enum InboundAction {
    Apply(SignalingMessage),
    Hangup,
    Drop,
}

struct SessionDriver<Pe: Peer, P> {
    peer: Pe,
    channel: Arc<RendezvousChannel<P>>,
    role: Role,
    machine: SessionMachine,
    binder: TrackBinder<Pe::RemoteStream>,
    tracks: LocalTrackSet,
    envelope: Option<EnvelopeState>,
    report_publish_errors: bool,
    state_tx: watch::Sender<SessionState>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl<Pe: Peer, P: PubSub + 'static> SessionDriver<Pe, P> {
    async fn run(
        mut self,
        inbound: Inbound,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEvent<Pe::RemoteStream>>,
        cancel_token: CancellationToken,
    ) {
        let (subscribed, mut messages) = inbound.into_parts();
        let mut subscribed = Box::pin(async move {
            match subscribed {
                Some(rx) => rx.await.is_ok(),
                None => true,
            }
        });
        let mut awaiting_subscription = true;
        let mut messages_open = true;

        let hangup = loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    self.advance(MachineEvent::Close);
                    break true;
                }
                ok = &mut subscribed, if awaiting_subscription => {
                    awaiting_subscription = false;
                    if ok && self.role == Role::Offerer {
                        self.send_offer(&cancel_token).await;
                    }
                }
                msg = messages.recv(), if messages_open => match msg {
                    Some(payload) => self.on_inbound(payload, &cancel_token).await,
                    None => {
                        tracing::debug!("Rendezvous channel {} closed", self.channel.topic());
                        messages_open = false;
                    }
                },
                event = peer_rx.recv() => match event {
                    Some(event) => self.on_peer_event(event, &cancel_token).await,
                    None => {
                        self.advance(MachineEvent::Close);
                    }
                },
            }

            if self.machine.state().is_terminal() {
                break false;
            }
        };

        self.teardown(hangup).await;
    }

    async fn send_offer(&mut self, cancel_token: &CancellationToken) {
        match self.peer.create_offer().await {
            Ok(offer) => {
                self.publish(EnvelopeKind::Signal, offer, cancel_token).await;
                self.advance(MachineEvent::SignalReady);
            }
            Err(e) => {
                tracing::warn!("Failed to create offer: {}", e);
                self.emit(SessionEvent::Error(e));
            }
        }
    }

    fn unwrap_inbound(&mut self, payload: SignalingMessage) -> InboundAction {
        let Some(envelope_state) = &mut self.envelope else {
            return InboundAction::Apply(payload);
        };
        let envelope = match Envelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Dropping message without envelope: {}", e);
                return InboundAction::Drop;
            }
        };
        if !envelope_state.dedup.accept(&envelope) {
            tracing::debug!(
                "Dropping duplicate message {} from {:016x}",
                envelope.seq,
                envelope.sender
            );
            return InboundAction::Drop;
        }
        match envelope.kind {
            EnvelopeKind::Signal => InboundAction::Apply(envelope.payload),
            EnvelopeKind::Hangup => InboundAction::Hangup,
        }
    }

    async fn on_inbound(&mut self, payload: SignalingMessage, cancel_token: &CancellationToken) {
        let payload = match self.unwrap_inbound(payload) {
            InboundAction::Apply(payload) => payload,
            InboundAction::Drop => return,
            InboundAction::Hangup => {
                tracing::info!("Remote endpoint hung up on {}", self.channel.topic());
                self.advance(MachineEvent::Close);
                return;
            }
        };

        match self.peer.apply_remote(payload).await {
            Ok(reply) => {
                self.advance(MachineEvent::SignalReady);
                if let Some(reply) = reply {
                    self.publish(EnvelopeKind::Signal, reply, cancel_token).await;
                }
            }
            Err(RendezvousError::Signaling(SignalingError::InvalidSignal(reason))) => {
                tracing::debug!("Ignoring message on {}: {}", self.channel.topic(), reason);
            }
            Err(e) => {
                tracing::warn!("Failed to apply remote message: {}", e);
                self.emit(SessionEvent::Error(e));
            }
        }
    }

    async fn on_peer_event(
        &mut self,
        event: PeerEvent<Pe::RemoteStream>,
        cancel_token: &CancellationToken,
    ) {
        match event {
            PeerEvent::LocalSignal(payload) => {
                self.publish(EnvelopeKind::Signal, payload, cancel_token).await;
                self.advance(MachineEvent::SignalReady);
            }
            PeerEvent::RemoteTrack(track) => {
                let kind = track.kind;
                self.binder.on_remote_track(track);
                self.emit(SessionEvent::RemoteTrack(kind));
            }
            PeerEvent::TrackRemoved(kind) => {
                tracing::debug!("Remote {} track removed", kind);
                self.binder.remove(kind);
                self.advance(MachineEvent::TrackRemoved);
            }
            PeerEvent::Transport(TransportState::Connected) => {
                self.advance(MachineEvent::TransportConnected);
            }
            PeerEvent::Transport(TransportState::Failed) => {
                self.advance(MachineEvent::TransportFailed);
                if self.machine.state() == SessionState::Failed {
                    self.emit(SessionEvent::Error(RendezvousError::NegotiationFailed(
                        "transport failed".to_string(),
                    )));
                }
            }
            PeerEvent::Transport(TransportState::Closed) => {
                self.advance(MachineEvent::Close);
            }
            PeerEvent::Transport(state) => {
                tracing::debug!("Transport {:?}", state);
            }
            PeerEvent::Chat(event) => self.emit(SessionEvent::Chat(event)),
        }
    }

    async fn publish(
        &mut self,
        kind: EnvelopeKind,
        payload: SignalingMessage,
        cancel_token: &CancellationToken,
    ) {
        let payload = match &mut self.envelope {
            Some(envelope_state) => envelope_state.wrap(kind, payload),
            None => payload,
        };
        let result = tokio::select! {
            _ = cancel_token.cancelled() => return,
            result = self.channel.publish(payload) => result,
        };
        // Baseline failures are already logged by the channel
        if let Err(e) = result {
            if self.report_publish_errors {
                self.emit(SessionEvent::Error(e));
            }
        }
    }

    /// Applies `event`, announcing non-terminal state changes right away.
    ///
    /// Terminal states are announced by `teardown` once resources are released.
    fn advance(&mut self, event: MachineEvent) {
        let before = self.machine.state();
        match self.machine.apply(event) {
            Ok(state) if state != before && !state.is_terminal() => {
                self.state_tx.send_replace(state);
                self.emit(SessionEvent::State(state));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Ignoring session event: {}", e),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn teardown(mut self, hangup: bool) {
        if hangup {
            if let Some(envelope_state) = &mut self.envelope {
                let payload = envelope_state.wrap(EnvelopeKind::Hangup, SignalingMessage::new());
                match tokio::time::timeout(HANGUP_TIMEOUT, self.channel.publish(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!("Failed to publish hangup: {}", e),
                    Err(_) => tracing::debug!("Timed out publishing hangup"),
                }
            }
        }

        self.binder.clear();
        self.tracks.stop();
        if let Err(e) = self.peer.close().await {
            tracing::debug!("Failed to close peer: {}", e);
        }
        self.channel.close();
        self.channel.release_session();

        let state = self.machine.state();
        tracing::info!("Session on {} ended: {:?}", self.channel.topic(), state);
        self.state_tx.send_replace(state);
        self.emit(SessionEvent::State(state));
    }
}
