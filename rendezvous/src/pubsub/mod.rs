use crate::error::Result;
use crate::protocol::{SignalingMessage, Topic};
use futures::Stream;
use std::pin::Pin;

pub mod lan;
pub mod memory;

pub use lan::{LanConfig, LanPubSub};
pub use memory::{MemoryHub, MemoryPubSub};

/// Stream of messages delivered on a subscribed topic.
pub type Subscription = Pin<Box<dyn Stream<Item = SignalingMessage> + Send>>;

/// Publish/subscribe medium a rendezvous channel runs over.
///
/// Implementations make a single attempt per call; retry policy belongs to
/// [`crate::RendezvousChannel`]. Delivery is best-effort and unordered, and
/// an endpoint never receives the messages it published itself.
pub trait PubSub: Send + Sync {
    /// Starts listening on a topic
    fn subscribe(
        &self,
        topic: &Topic,
    ) -> impl std::future::Future<Output = Result<Subscription>> + Send;

    /// Publishes a payload to every current subscriber of a topic
    fn publish(
        &self,
        topic: &Topic,
        payload: SignalingMessage,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Returns the local endpoint ID
    fn local_id(&self) -> u64;
}
