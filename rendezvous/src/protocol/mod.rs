pub mod constants;
pub mod datagram;
pub mod envelope;
pub mod negotiation;
pub mod topic;

pub use envelope::{Deduplicator, Envelope, EnvelopeKind};
pub use negotiation::NegotiationMessage;
pub use topic::Topic;

/// Opaque signaling payload carried verbatim over a rendezvous topic.
///
/// The rendezvous layer stamps no type, sender or sequence number on it; its
/// meaning is defined by the negotiation protocol that produced it.
pub type SignalingMessage = bytes::Bytes;
