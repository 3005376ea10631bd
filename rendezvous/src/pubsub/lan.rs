use crate::error::Result;
use crate::protocol::constants::DEFAULT_LAN_PORT;
use crate::protocol::datagram::{self, TopicKey};
use crate::protocol::{SignalingMessage, Topic};
use crate::pubsub::{PubSub, Subscription};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

const RECV_BUFFER_SIZE: usize = 65_535;

/// Socket settings of a [`LanPubSub`].
#[derive(Debug, Clone)]
pub struct LanConfig {
    /// Local address to receive datagrams on
    pub bind_addr: SocketAddr,
    /// Address every publish is sent to
    pub broadcast_addr: SocketAddr,
    /// Bind with `SO_REUSEADDR`/`SO_REUSEPORT` so several endpoints can share a port
    pub reuse_port: bool,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), DEFAULT_LAN_PORT),
            broadcast_addr: SocketAddr::new(Ipv4Addr::BROADCAST.into(), DEFAULT_LAN_PORT),
            reuse_port: true,
        }
    }
}

struct TopicEntry {
    key: TopicKey,
    subscribers: Vec<mpsc::UnboundedSender<SignalingMessage>>,
}

type Topics = Arc<RwLock<HashMap<[u8; 8], TopicEntry>>>;

/// Drops closed subscribers and topics nobody listens to anymore.
fn prune(topics: &mut HashMap<[u8; 8], TopicEntry>) {
    topics.retain(|_, entry| {
        entry.subscribers.retain(|tx| !tx.is_closed());
        !entry.subscribers.is_empty()
    });
}

/// Pub/sub over UDP broadcast on the local network.
///
/// Each endpoint picks a random sender id and ignores datagrams carrying it,
/// so its own broadcasts are never delivered back to it.
pub struct LanPubSub {
    sender_id: u64,
    socket: Arc<UdpSocket>,
    broadcast_addr: SocketAddr,
    topics: Topics,
    cancel_token: CancellationToken,
}

impl LanPubSub {
    pub async fn new(config: LanConfig) -> Result<Self> {
        let socket = if config.reuse_port {
            let socket = socket2::Socket::new(
                socket2::Domain::for_address(config.bind_addr),
                socket2::Type::DGRAM,
                Some(socket2::Protocol::UDP),
            )?;

            socket.set_reuse_address(true)?;
            #[cfg(unix)]
            socket.set_reuse_port(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&config.bind_addr.into())?;

            UdpSocket::from_std(socket.into())?
        } else {
            UdpSocket::bind(config.bind_addr).await?
        };

        socket.set_broadcast(true)?;

        let pubsub = Self {
            sender_id: rand::random(),
            socket: Arc::new(socket),
            broadcast_addr: config.broadcast_addr,
            topics: Arc::new(RwLock::new(HashMap::new())),
            cancel_token: CancellationToken::new(),
        };

        pubsub.start_receiver();
        tracing::debug!(
            "LAN pub/sub bound to {:?}, broadcasting to {}",
            pubsub.socket.local_addr().ok(),
            pubsub.broadcast_addr
        );
        Ok(pubsub)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn start_receiver(&self) {
        let socket = self.socket.clone();
        let topics = self.topics.clone();
        let own_id = self.sender_id;
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    res = socket.recv_from(&mut buf) => match res {
                        Ok((n, addr)) => {
                            Self::handle_datagram(&buf[..n], addr, own_id, &topics).await;
                        }
                        Err(e) => {
                            tracing::debug!("Socket receive error: {}", e);
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn handle_datagram(data: &[u8], addr: SocketAddr, own_id: u64, topics: &Topics) {
        let Some(tag) = datagram::peek_tag(data) else {
            return;
        };

        let mut topics = topics.write().await;
        let Some(entry) = topics.get_mut(&tag) else {
            return;
        };

        let message = match datagram::open(&entry.key, data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };
        if message.sender_id == own_id {
            return;
        }

        entry.subscribers.retain(|tx| tx.send(message.payload.clone()).is_ok());
        if entry.subscribers.is_empty() {
            topics.remove(&tag);
        }
    }
}

impl PubSub for LanPubSub {
    async fn subscribe(&self, topic: &Topic) -> Result<Subscription> {
        let key = TopicKey::derive(topic);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut topics = self.topics.write().await;
            prune(&mut topics);
            topics
                .entry(key.tag())
                .or_insert_with(|| TopicEntry {
                    key,
                    subscribers: Vec::new(),
                })
                .subscribers
                .push(tx);
        }

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        })))
    }

    async fn publish(&self, topic: &Topic, payload: SignalingMessage) -> Result<()> {
        let key = TopicKey::derive(topic);
        let data = datagram::seal(&key, self.sender_id, &payload)?;
        self.socket.send_to(&data, self.broadcast_addr).await?;
        Ok(())
    }

    fn local_id(&self) -> u64 {
        self.sender_id
    }
}

impl Drop for LanPubSub {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
