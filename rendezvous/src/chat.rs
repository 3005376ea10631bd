//! Text chat over the session's reliable, ordered side channel.

use crate::error::Result;

/// Lifecycle and inbound traffic of the chat side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Opened,
    Closed,
    /// Text received from the peer, in arrival order
    Message(String),
}

/// Reliable, ordered data channel provided by a peer session.
pub trait SideChannel: Clone + Send + Sync + 'static {
    fn is_open(&self) -> bool;

    fn send_text(&self, text: String) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Sending half of the chat.
///
/// Messages sent while the side channel is not open are dropped, not queued.
#[derive(Clone)]
pub struct ChatChannel<C> {
    channel: C,
}

impl<C: SideChannel> ChatChannel<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Sends `text` to the peer.
    ///
    /// Returns `Ok(false)` without sending if the channel is not open.
    pub async fn send(&self, text: &str) -> Result<bool> {
        if !self.channel.is_open() {
            tracing::debug!("Chat channel not open, dropping {} bytes", text.len());
            return Ok(false);
        }
        self.channel.send_text(text.to_owned()).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Loop {
        open: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl SideChannel for Loop {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: String) -> Result<()> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_before_open_is_a_noop() {
        let side = Loop::default();
        let chat = ChatChannel::new(side.clone());

        assert!(!chat.send("early").await.unwrap());
        assert!(side.sent.lock().unwrap().is_empty());

        side.open.store(true, Ordering::SeqCst);
        assert!(chat.send("hello").await.unwrap());
        assert!(chat.send("again").await.unwrap());
        assert_eq!(*side.sent.lock().unwrap(), vec!["hello", "again"]);

        side.open.store(false, Ordering::SeqCst);
        assert!(!chat.send("late").await.unwrap());
        assert_eq!(side.sent.lock().unwrap().len(), 2);
    }
}
