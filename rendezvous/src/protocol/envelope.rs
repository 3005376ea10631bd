//! Optional signaling envelope.
//!
//! Raw rendezvous payloads carry no sender or sequence information, so a
//! receiver cannot tell a retransmission from a new message. When enabled, each
//! outbound payload is wrapped as:
//!
//! `version (u8) | kind (u8) | sender (u64 LE) | seq (u64 LE) | payload`
//!
//! and [`Deduplicator`] drops echoes of our own messages and repeats.

use super::constants::{DEDUP_WINDOW, ENVELOPE_VERSION};
use crate::error::{Result, SignalingError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

const ENVELOPE_HEADER_SIZE: usize = 18;

/// What an enveloped message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// A negotiation payload for the peer session
    Signal = 0,
    /// The sender closed its session
    Hangup = 1,
}

impl EnvelopeKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Signal),
            1 => Some(Self::Hangup),
            _ => None,
        }
    }
}

/// A signaling payload stamped with its sender and a per-sender counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub sender: u64,
    pub seq: u64,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, sender: u64, seq: u64, payload: Bytes) -> Self {
        Self {
            kind,
            sender,
            seq,
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + self.payload.len());
        buf.put_u8(ENVELOPE_VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u64_le(self.sender);
        buf.put_u64_le(self.seq);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decodes an envelope, rejecting unknown versions and kinds.
    pub fn decode(data: &Bytes) -> Result<Self> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(SignalingError::InvalidSignal(format!(
                "envelope too short: {} bytes",
                data.len()
            ))
            .into());
        }

        let mut buf = data.clone();
        let version = buf.get_u8();
        if version != ENVELOPE_VERSION {
            return Err(
                SignalingError::InvalidSignal(format!("unknown envelope version {}", version)).into(),
            );
        }
        let raw_kind = buf.get_u8();
        let kind = EnvelopeKind::from_u8(raw_kind).ok_or_else(|| {
            SignalingError::InvalidSignal(format!("unknown envelope kind {}", raw_kind))
        })?;
        let sender = buf.get_u64_le();
        let seq = buf.get_u64_le();

        Ok(Self {
            kind,
            sender,
            seq,
            payload: buf,
        })
    }
}

/// Per-sender window of recently seen sequence numbers.
#[derive(Debug, Default)]
struct SeqWindow {
    newest: u64,
    // Bit n set means `newest - n` was seen; bit 0 is `newest` itself.
    seen: u64,
}

impl SeqWindow {
    fn see(&mut self, seq: u64) -> bool {
        if self.seen == 0 {
            self.newest = seq;
            self.seen = 1;
            return true;
        }

        if seq > self.newest {
            let shift = seq - self.newest;
            self.seen = if shift >= DEDUP_WINDOW {
                0
            } else {
                self.seen << shift
            };
            self.seen |= 1;
            self.newest = seq;
            return true;
        }

        let age = self.newest - seq;
        if age >= DEDUP_WINDOW {
            return false;
        }
        let bit = 1u64 << age;
        if self.seen & bit != 0 {
            return false;
        }
        self.seen |= bit;
        true
    }
}

/// Filters enveloped messages that are our own or were already delivered.
///
/// Out-of-order messages are still accepted as long as they are within
/// the last `DEDUP_WINDOW` sequence numbers of their sender.
#[derive(Debug)]
pub struct Deduplicator {
    local_sender: u64,
    windows: HashMap<u64, SeqWindow>,
}

impl Deduplicator {
    pub fn new(local_sender: u64) -> Self {
        Self {
            local_sender,
            windows: HashMap::new(),
        }
    }

    /// Returns true if the envelope is new and should be processed.
    pub fn accept(&mut self, envelope: &Envelope) -> bool {
        if envelope.sender == self.local_sender {
            return false;
        }
        self.windows.entry(envelope.sender).or_default().see(envelope.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(sender: u64, seq: u64) -> Envelope {
        Envelope::new(EnvelopeKind::Signal, sender, seq, Bytes::from_static(b"x"))
    }

    #[test]
    fn test_decode_preserves_payload_verbatim() {
        let env = Envelope::new(
            EnvelopeKind::Hangup,
            0xdead_beef,
            7,
            Bytes::from_static(b"OFFER:abc"),
        );
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(&decoded.payload[..], b"OFFER:abc");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(&Bytes::from_static(b"OFFER:abc")).is_err());

        let mut bad_version = signal(1, 1).encode().to_vec();
        bad_version[0] = 99;
        assert!(Envelope::decode(&Bytes::from(bad_version)).is_err());

        let mut bad_kind = signal(1, 1).encode().to_vec();
        bad_kind[1] = 42;
        assert!(Envelope::decode(&Bytes::from(bad_kind)).is_err());
    }

    #[test]
    fn drops_own_messages() {
        let mut dedup = Deduplicator::new(5);
        assert!(!dedup.accept(&signal(5, 0)));
        assert!(dedup.accept(&signal(6, 0)));
    }

    #[test]
    fn drops_duplicates() {
        let mut dedup = Deduplicator::new(0);
        assert!(dedup.accept(&signal(1, 0)));
        assert!(dedup.accept(&signal(1, 1)));
        assert!(!dedup.accept(&signal(1, 1)));
        assert!(!dedup.accept(&signal(1, 0)));
    }

    #[test]
    fn accepts_reordered_within_window() {
        let mut dedup = Deduplicator::new(0);
        assert!(dedup.accept(&signal(1, 10)));
        assert!(dedup.accept(&signal(1, 8)));
        assert!(dedup.accept(&signal(1, 9)));
        assert!(!dedup.accept(&signal(1, 8)));
    }

    #[test]
    fn drops_messages_older_than_window() {
        let mut dedup = Deduplicator::new(0);
        assert!(dedup.accept(&signal(1, 100)));
        assert!(!dedup.accept(&signal(1, 100 - DEDUP_WINDOW)));
        assert!(dedup.accept(&signal(1, 100 - DEDUP_WINDOW + 1)));
    }

    #[test]
    fn senders_are_tracked_independently() {
        let mut dedup = Deduplicator::new(0);
        assert!(dedup.accept(&signal(1, 3)));
        assert!(dedup.accept(&signal(2, 3)));
        assert!(!dedup.accept(&signal(2, 3)));
    }

    #[test]
    fn late_joiner_accepts_high_sequence_numbers() {
        let mut dedup = Deduplicator::new(0);
        assert!(dedup.accept(&signal(1, 5000)));
        assert!(dedup.accept(&signal(1, 5001)));
    }
}
