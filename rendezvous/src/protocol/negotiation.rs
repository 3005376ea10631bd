//! WebRTC negotiation payloads.
//!
//! These are the messages the WebRTC peer publishes on a rendezvous topic.
//! They use the protocol's own JSON shapes, with no extra framing:
//! `{"type":"offer","sdp":"..."}` for descriptions and
//! `{"candidate":"...","sdpMid":"0","sdpMLineIndex":0}` for ICE candidates.

use crate::error::{Result, SignalingError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Messages exchanged during WebRTC connection establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NegotiationMessage {
    /// Session description (offer or answer)
    Description(RTCSessionDescription),
    /// Trickled ICE candidate
    Candidate(RTCIceCandidateInit),
}

impl NegotiationMessage {
    /// Parses a negotiation message from a signaling payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| {
            SignalingError::InvalidSignal(format!("not a negotiation message: {}", e)).into()
        })
    }

    /// Serializes the message into a signaling payload.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Returns the message type as a string.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Description(desc) => match desc.sdp_type {
                RTCSdpType::Offer => "offer",
                RTCSdpType::Answer => "answer",
                RTCSdpType::Pranswer => "pranswer",
                RTCSdpType::Rollback => "rollback",
                RTCSdpType::Unspecified => "unspecified",
            },
            Self::Candidate(_) => "candidate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offer_description() {
        let payload = br#"{"type":"offer","sdp":"v=0\r\no=- 123456789 2 IN IP4 127.0.0.1\r\n"}"#;
        let msg = NegotiationMessage::parse(payload).unwrap();
        match &msg {
            NegotiationMessage::Description(desc) => {
                assert_eq!(desc.sdp_type, RTCSdpType::Offer);
                assert!(desc.sdp.starts_with("v=0"));
            }
            other => panic!("expected description, got {:?}", other),
        }
        assert_eq!(msg.message_type(), "offer");
    }

    #[test]
    fn test_parse_answer_description() {
        let payload = br#"{"type":"answer","sdp":"v=0"}"#;
        let msg = NegotiationMessage::parse(payload).unwrap();
        assert_eq!(msg.message_type(), "answer");
    }

    #[test]
    fn test_parse_candidate() {
        let payload = br#"{"candidate":"candidate:1234567890 1 udp 2130706431 192.168.1.100 54321 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let msg = NegotiationMessage::parse(payload).unwrap();
        match msg {
            NegotiationMessage::Candidate(init) => {
                assert!(init.candidate.contains("typ host"));
                assert_eq!(init.sdp_mid.as_deref(), Some("0"));
            }
            other => panic!("expected candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_encoded_candidate_parses_back_as_candidate() {
        let msg = NegotiationMessage::Candidate(RTCIceCandidateInit {
            candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".to_string(),
            ..Default::default()
        });
        let encoded = msg.encode().unwrap();
        assert_eq!(NegotiationMessage::parse(&encoded).unwrap().message_type(), "candidate");
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(NegotiationMessage::parse(b"OFFER:abc").is_err());
        assert!(NegotiationMessage::parse(b"[1,2,3]").is_err());
        assert!(NegotiationMessage::parse(b"").is_err());
    }
}
