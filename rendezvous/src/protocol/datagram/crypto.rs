//! Encryption and authentication for LAN datagrams.
//!
//! Datagrams are encrypted using AES-256-ECB with PKCS7 padding and
//! authenticated with HMAC-SHA256, both keyed by the SHA-256 of the topic.

use crate::error::{Result, SignalingError};
use aes::Aes256;
use aes::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::protocol::constants::TOPIC_TAG_SIZE;
use crate::protocol::topic::Topic;

const BLOCK_SIZE: usize = 16;

/// Key material derived from a topic.
///
/// Only endpoints that know the topic can produce or read datagrams for it.
/// The tag is sent in clear so receivers can pick the key without trial decryption.
#[derive(Clone, PartialEq, Eq)]
pub struct TopicKey {
    key: [u8; 32],
    tag: [u8; TOPIC_TAG_SIZE],
}

impl TopicKey {
    pub fn derive(topic: &Topic) -> Self {
        let key: [u8; 32] = Sha256::digest(topic.as_str().as_bytes()).into();
        let digest = Sha256::digest(key);
        let mut tag = [0u8; TOPIC_TAG_SIZE];
        tag.copy_from_slice(&digest[..TOPIC_TAG_SIZE]);
        Self { key, tag }
    }

    pub fn tag(&self) -> [u8; TOPIC_TAG_SIZE] {
        self.tag
    }
}

impl std::fmt::Debug for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicKey").field("tag", &self.tag).finish_non_exhaustive()
    }
}

/// Encrypts the given bytes using AES-256 in ECB mode with PKCS#7 padding.
///
/// The returned ciphertext length is always a multiple of 16 bytes.
pub(crate) fn encrypt(key: &TopicKey, data: &[u8]) -> Vec<u8> {
    let cipher = Aes256::new(&key.key.into());

    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

    for chunk in padded.chunks_exact_mut(BLOCK_SIZE) {
        let block = Block::<Aes256>::from_mut_slice(chunk);
        cipher.encrypt_block(block);
    }

    padded
}

/// Decrypts AES-256-ECB ciphertext and strips its PKCS#7 padding.
pub(crate) fn decrypt(key: &TopicKey, data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256::new(&key.key.into());

    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(SignalingError::Rejected("invalid encrypted data length".to_string()).into());
    }

    let mut decrypted = data.to_vec();
    for chunk in decrypted.chunks_exact_mut(BLOCK_SIZE) {
        let block = Block::<Aes256>::from_mut_slice(chunk);
        cipher.decrypt_block(block);
    }

    if let Some(&padding_len) = decrypted.last() {
        if padding_len > 0 && padding_len as usize <= BLOCK_SIZE {
            let data_len = decrypted.len();
            if data_len >= padding_len as usize {
                // constant-time padding check
                let padding_start = data_len - padding_len as usize;
                let mut mismatched: u8 = 0;
                for &byte in &decrypted[padding_start..] {
                    mismatched |= byte ^ padding_len;
                }
                if mismatched == 0 {
                    decrypted.truncate(padding_start);
                    return Ok(decrypted);
                }
            }
        }
    }

    Err(SignalingError::Rejected("invalid padding".to_string()).into())
}

fn mac(key: &TopicKey) -> Result<Hmac<Sha256>> {
    <Hmac<Sha256> as Mac>::new_from_slice(&key.key)
        .map_err(|e| SignalingError::Rejected(format!("hmac key: {}", e)).into())
}

/// Computes the HMAC-SHA256 checksum of `data` under the topic key.
pub(crate) fn compute_checksum(key: &TopicKey, data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = mac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Returns `true` if `expected` is the HMAC-SHA256 of `data` under the topic key.
pub(crate) fn verify_checksum(key: &TopicKey, data: &[u8], expected: &[u8]) -> Result<bool> {
    let mut mac = mac(key)?;
    mac.update(data);
    Ok(mac.verify_slice(expected).is_ok())
}
