use bytes::Bytes;
use clap::{Parser, ValueEnum};
use rendezvous::{
    ChannelConfigBuilder, ChatChannel, ChatEvent, LanConfig, LanPubSub, LocalTrack, MediaConstraints,
    MediaSink, Peer, RendezvousChannel, Role, SampleDevices, SessionConfigBuilder,
    SessionController, SessionEvent, SideChannel, Sinks, StreamHandle, Topic, TrackKind,
    WebRtcConnector, WebRtcPeer, acquire_with_timeout,
};
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Opus frame that decodes to 20ms of silence.
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
const OPUS_FRAME: Duration = Duration::from_millis(20);

type RemoteTrack = <WebRtcPeer as Peer>::RemoteStream;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Offerer,
    Answerer,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Offerer => Role::Offerer,
            RoleArg::Answerer => Role::Answerer,
        }
    }
}

/// Joins a call on the local network. Both ends run this with the same link.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Shared link or room name; only the part after '#' is used
    link: String,

    #[arg(long, value_enum, default_value = "offerer")]
    role: RoleArg,

    #[arg(long, default_value = "0.0.0.0:7600")]
    bind: SocketAddr,

    #[arg(long, default_value = "255.255.255.255:7600")]
    broadcast: SocketAddr,

    /// STUN/TURN server URL, may be repeated
    #[arg(long = "ice")]
    ice_servers: Vec<String>,

    #[arg(long)]
    no_audio: bool,

    #[arg(long)]
    no_video: bool,

    /// Wrap signaling in envelopes and drop duplicates (both ends must agree)
    #[arg(long)]
    envelope: bool,

    /// Retry failed publishes this many times in total
    #[arg(long)]
    publish_retries: Option<u32>,

    #[arg(long)]
    debug: bool,
}

/// Logs what a sink would render.
struct LogSink(&'static str);

impl MediaSink<RemoteTrack> for LogSink {
    fn set_source(&self, source: StreamHandle<RemoteTrack>) {
        match source {
            StreamHandle::Local(track) => tracing::info!("[{}] showing local {}", self.0, track.id()),
            StreamHandle::Remote(track) => tracing::info!(
                "[{}] playing remote {} track {}",
                self.0,
                track.kind(),
                track.id()
            ),
        }
    }

    fn clear(&self) {
        tracing::info!("[{}] cleared", self.0);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter_layer = filter::LevelFilter::from_level(level);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .init();

    let topic = Topic::from_context(&args.link)?;
    tracing::info!("Joining {} as {:?}", topic, args.role);

    let pubsub = LanPubSub::new(LanConfig {
        bind_addr: args.bind,
        broadcast_addr: args.broadcast,
        reuse_port: true,
    })
    .await?;

    let mut channel_config = ChannelConfigBuilder::new();
    if let Some(attempts) = args.publish_retries {
        channel_config = channel_config.publish_attempts(attempts);
    }
    let channel = Arc::new(RendezvousChannel::with_config(
        Arc::new(pubsub),
        topic,
        channel_config.build()?,
    )?);

    let mut session_config = SessionConfigBuilder::new()
        .role(args.role.into())
        .envelope(args.envelope);
    if !args.ice_servers.is_empty() {
        session_config = session_config.ice_servers(args.ice_servers.clone());
    }

    let session_config = session_config.build()?;
    let acquire_timeout = session_config.acquire_timeout;
    let controller = SessionController::new(WebRtcConnector::new(), channel, session_config)?;
    let sinks = Sinks {
        local_video: Some(Arc::new(LogSink("preview")) as Arc<dyn MediaSink<RemoteTrack>>),
        remote_audio: Some(Arc::new(LogSink("speaker")) as Arc<dyn MediaSink<RemoteTrack>>),
        remote_video: Some(Arc::new(LogSink("screen")) as Arc<dyn MediaSink<RemoteTrack>>),
    };
    let constraints = MediaConstraints {
        audio: !args.no_audio,
        video: !args.no_video,
    };

    let tracks = acquire_with_timeout(&SampleDevices::default(), constraints, acquire_timeout).await?;
    for track in tracks.of_kind(TrackKind::Audio) {
        feed_silence(track.clone());
    }
    let mut session = controller.start(tracks, sinks).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Hanging up...");
                session.close();
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    relay_chat(session.chat(), &line).await;
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            event = session.next_event() => match event {
                Some(SessionEvent::State(state)) => {
                    tracing::info!("Session {:?}", state);
                    if state.is_terminal() {
                        break;
                    }
                }
                Some(SessionEvent::RemoteTrack(kind)) => tracing::info!("Receiving remote {}", kind),
                Some(SessionEvent::Chat(ChatEvent::Message(text))) => println!("peer> {}", text),
                Some(SessionEvent::Chat(ChatEvent::Opened)) => tracing::info!("Chat open, type to send"),
                Some(SessionEvent::Chat(ChatEvent::Closed)) => tracing::info!("Chat closed"),
                Some(SessionEvent::Error(e)) => tracing::error!("Session error: {}", e),
                None => break,
            },
        }
    }

    let state = session.closed().await;
    tracing::info!("Call ended: {:?}", state);
    Ok(())
}

/// Sends a typed line to the peer. Failures are logged and the call goes on.
async fn relay_chat<C: SideChannel>(chat: &ChatChannel<C>, line: &str) -> bool {
    match chat.send(line).await {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!("Chat is not open yet, message dropped");
            false
        }
        Err(e) => {
            tracing::warn!("Failed to send chat: {}", e);
            false
        }
    }
}

/// Keeps an audio track alive with silence until it is stopped.
fn feed_silence(track: Arc<LocalTrack>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(OPUS_FRAME);
        loop {
            tokio::select! {
                _ = track.stopped() => break,
                _ = ticker.tick() => {
                    if track.write_sample(Bytes::from_static(OPUS_SILENCE), OPUS_FRAME).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous::RendezvousError;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Default)]
    struct FlakyChannel {
        open: Arc<AtomicBool>,
        failing: Arc<AtomicBool>,
    }

    impl SideChannel for FlakyChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, _text: String) -> rendezvous::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(RendezvousError::DataChannel("send buffer full".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn chat_send_failure_keeps_the_call_going() {
        let side = FlakyChannel::default();
        let chat = ChatChannel::new(side.clone());

        assert!(!relay_chat(&chat, "early").await);

        side.open.store(true, Ordering::SeqCst);
        side.failing.store(true, Ordering::SeqCst);
        assert!(!relay_chat(&chat, "lost").await);

        side.failing.store(false, Ordering::SeqCst);
        assert!(relay_chat(&chat, "hello").await);
    }
}
