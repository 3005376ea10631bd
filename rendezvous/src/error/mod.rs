use std::io;
use thiserror::Error;

/// Errors produced by the rendezvous and session layers.
#[derive(Debug, Error)]
pub enum RendezvousError {
    /// WebRTC error
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Pub/sub signaling error
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON payload error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel or session already closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The rendezvous channel already drives a session
    #[error("A session is already active on topic {0}")]
    SessionActive(String),

    /// Local capture devices could not be obtained
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// The same local track was handed to a session twice
    #[error("Track {0} was already added to the session")]
    DuplicateTrack(String),

    /// The transport reported an irrecoverable failure during or after negotiation
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Invalid topic or shared context
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Message too large error
    #[error("Message too large: exceeds maximum size of {0} bytes")]
    MessageTooLarge(usize),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Errors related to pub/sub operations.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Subscribe attempt failed
    #[error("Failed to subscribe to {topic}: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Publish attempt failed
    #[error("Failed to publish to {topic}: {reason}")]
    SendFailed { topic: String, reason: String },

    /// Publish failed after exhausting the retry policy
    #[error("Publish to {topic} failed after {attempts} attempts: {reason}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        reason: String,
    },

    /// Subscribe called on a channel that is subscribing or subscribed
    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),

    /// Invalid or undecodable signaling payload
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Datagram could not be authenticated
    #[error("Datagram rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, RendezvousError>;
