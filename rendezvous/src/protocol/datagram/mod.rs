//! Wire format of LAN pub/sub datagrams.
//!
//! ```text
//! tag[8] | hmac-sha256[32] | aes-256-ecb(length u16 | kind u16 | sender u64 | padding[8] | payload)
//! ```
//!
//! The tag identifies the topic key; the checksum is computed over the plaintext.

mod crypto;

pub use crypto::TopicKey;

use crate::error::{RendezvousError, Result, SignalingError};
use crate::protocol::constants::{HEADER_SIZE, ID_PUBLISH_PACKET, MAX_DATAGRAM_PAYLOAD, TOPIC_TAG_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crypto::{compute_checksum, decrypt, encrypt, verify_checksum};

const CHECKSUM_SIZE: usize = 32;

/// A published message recovered from a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Endpoint that published the message
    pub sender_id: u64,
    /// Message payload, verbatim
    pub payload: Bytes,
}

/// Reads the cleartext topic tag from the front of a datagram.
pub fn peek_tag(data: &[u8]) -> Option<[u8; TOPIC_TAG_SIZE]> {
    data.get(..TOPIC_TAG_SIZE)?.try_into().ok()
}

/// Encodes a published message for the given topic key.
///
/// Returns an error if the payload exceeds [`MAX_DATAGRAM_PAYLOAD`].
pub fn seal(key: &TopicKey, sender_id: u64, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(RendezvousError::MessageTooLarge(MAX_DATAGRAM_PAYLOAD));
    }

    let mut plain = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    plain.put_u16_le((HEADER_SIZE - 2 + payload.len()) as u16);
    plain.put_u16_le(ID_PUBLISH_PACKET);
    plain.put_u64_le(sender_id);
    plain.put_bytes(0, 8);
    plain.put_slice(payload);

    let checksum = compute_checksum(key, &plain)?;
    let encrypted = encrypt(key, &plain);

    let mut out = BytesMut::with_capacity(TOPIC_TAG_SIZE + CHECKSUM_SIZE + encrypted.len());
    out.put_slice(&key.tag());
    out.put_slice(&checksum);
    out.put_slice(&encrypted);
    Ok(out.freeze())
}

/// Decodes and authenticates a datagram sealed with `key`.
///
/// Fails on tag or checksum mismatch, unknown kinds, and inconsistent lengths.
pub fn open(key: &TopicKey, data: &[u8]) -> Result<Datagram> {
    if data.len() < TOPIC_TAG_SIZE + CHECKSUM_SIZE {
        return Err(SignalingError::Rejected("datagram too short".to_string()).into());
    }
    if data[..TOPIC_TAG_SIZE] != key.tag() {
        return Err(SignalingError::Rejected("topic tag mismatch".to_string()).into());
    }

    let checksum = &data[TOPIC_TAG_SIZE..TOPIC_TAG_SIZE + CHECKSUM_SIZE];
    let plain = decrypt(key, &data[TOPIC_TAG_SIZE + CHECKSUM_SIZE..])?;
    if !verify_checksum(key, &plain, checksum)? {
        return Err(SignalingError::Rejected("checksum mismatch".to_string()).into());
    }
    if plain.len() < HEADER_SIZE {
        return Err(SignalingError::Rejected("truncated header".to_string()).into());
    }

    let mut buf = Bytes::from(plain);
    let length = buf.get_u16_le() as usize;
    if length != buf.remaining() {
        return Err(SignalingError::Rejected(format!(
            "length mismatch: header says {}, got {}",
            length,
            buf.remaining()
        ))
        .into());
    }
    let kind = buf.get_u16_le();
    if kind != ID_PUBLISH_PACKET {
        return Err(SignalingError::Rejected(format!("unknown datagram kind: {}", kind)).into());
    }
    let sender_id = buf.get_u64_le();
    buf.advance(8);

    Ok(Datagram {
        sender_id,
        payload: buf,
    })
}
