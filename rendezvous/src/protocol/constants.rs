//! Constants for the rendezvous protocol and its LAN transport.

use std::time::Duration;

/// Delay between subscribe attempts after a failure.
pub const DEFAULT_SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Prefix stamped on every topic derived from a shared context.
pub const TOPIC_PREFIX: &str = "rendezvous/";

/// Label of the reliable, ordered data channel used for chat.
pub const CHAT_CHANNEL: &str = "chat";

/// Connectivity server used when none is configured.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// How long media acquisition may stay pending before it is reported as failed.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default UDP port used by the LAN transport.
pub const DEFAULT_LAN_PORT: u16 = 7600;

/// Datagram kind carrying a published message.
pub const ID_PUBLISH_PACKET: u16 = 0;

/// Maximum payload carried in one LAN datagram (in bytes)
pub const MAX_DATAGRAM_PAYLOAD: usize = 60_000;

/// Sealed header size (in bytes)
/// Length (2) + Kind (2) + SenderID (8) + Padding (8) = 20 bytes
pub const HEADER_SIZE: usize = 20;

/// Size of the cleartext topic tag that prefixes every LAN datagram.
pub const TOPIC_TAG_SIZE: usize = 8;

/// Number of sequence numbers tracked behind the newest one per sender.
pub const DEDUP_WINDOW: u64 = 64;

/// Version byte of the signaling envelope.
pub const ENVELOPE_VERSION: u8 = 1;
