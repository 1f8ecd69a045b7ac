//! Signaling wire protocol
//!
//! JSON text frames, one message per frame, discriminated by a `type` field:
//!
//! | type        | payload                         |
//! |-------------|---------------------------------|
//! | `hello`     | `from`                          |
//! | `offer`     | `offer` (description), `from`   |
//! | `answer`    | `answer` (description)          |
//! | `candidate` | `candidate` (ICE candidate)     |
//! | `endCall`   | none                            |
//! | `ping`      | none                            |
//!
//! Descriptions and candidates use the browser's JSON shapes so either side
//! can be a browser.

use serde::{Deserialize, Serialize};

use crate::Result;

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback (never produced by this crate)
    Rollback,
}

/// A negotiation description (`{ "type": "offer", "sdp": "..." }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP
    pub sdp: String,
}

impl SessionDescription {
    /// Offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate in browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// `candidate:...` attribute line; empty marks end-of-candidates
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line this candidate belongs to
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Messages exchanged over the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Greeting sent on every channel open
    Hello {
        /// Sender display name, if the peer sent one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },

    /// Negotiation offer
    Offer {
        /// Offer description
        offer: SessionDescription,
        /// Sender display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },

    /// Negotiation answer
    Answer {
        /// Answer description
        answer: SessionDescription,
    },

    /// Trickled connectivity candidate
    Candidate {
        /// Candidate payload; `None` or empty carries nothing to apply
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },

    /// Explicit hang-up
    EndCall,

    /// Liveness keepalive, never answered
    Ping,
}

impl WireMessage {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Hello { .. } => "hello",
            WireMessage::Offer { .. } => "offer",
            WireMessage::Answer { .. } => "answer",
            WireMessage::Candidate { .. } => "candidate",
            WireMessage::EndCall => "endCall",
            WireMessage::Ping => "ping",
        }
    }
}

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A recognized message
    Message(WireMessage),
    /// Valid JSON whose `type` this side does not know
    Unknown(String),
    /// Valid JSON without a string `type` field
    Untyped,
}

const KNOWN_TYPES: [&str; 6] = ["hello", "offer", "answer", "candidate", "endCall", "ping"];

/// Serialize a message to a text frame
pub fn encode(message: &WireMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a text frame
///
/// # Errors
///
/// Returns an error if the frame is not JSON, or if a known message type
/// carries a malformed payload.
pub fn decode(text: &str) -> Result<Inbound> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let kind = match value.get("type").and_then(|t| t.as_str()) {
        Some(kind) => kind,
        None => return Ok(Inbound::Untyped),
    };

    if !KNOWN_TYPES.contains(&kind) {
        return Ok(Inbound::Unknown(kind.to_string()));
    }

    Ok(Inbound::Message(serde_json::from_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_shapes() {
        let hello = encode(&WireMessage::Hello {
            from: Some("Alice".to_string()),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&hello).unwrap();
        assert_eq!(value, json!({"type": "hello", "from": "Alice"}));

        let end = encode(&WireMessage::EndCall).unwrap();
        assert_eq!(end, r#"{"type":"endCall"}"#);

        let offer = encode(&WireMessage::Offer {
            offer: SessionDescription::offer("v=0"),
            from: Some("Alice".to_string()),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&offer).unwrap();
        assert_eq!(
            value,
            json!({"type": "offer", "offer": {"type": "offer", "sdp": "v=0"}, "from": "Alice"})
        );
    }

    #[test]
    fn test_decode_browser_candidate() {
        let text = r#"{"type":"candidate","candidate":{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 54400 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}}"#;
        let decoded = decode(text).unwrap();
        match decoded {
            Inbound::Message(WireMessage::Candidate {
                candidate: Some(c),
            }) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert_eq!(c.username_fragment.as_deref(), Some("abcd"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_candidate_without_payload() {
        assert_eq!(
            decode(r#"{"type":"candidate"}"#).unwrap(),
            Inbound::Message(WireMessage::Candidate { candidate: None })
        );
        assert_eq!(
            decode(r#"{"type":"candidate","candidate":null}"#).unwrap(),
            Inbound::Message(WireMessage::Candidate { candidate: None })
        );
    }

    #[test]
    fn test_decode_offer_without_from() {
        let decoded = decode(r#"{"type":"offer","offer":{"type":"offer","sdp":"v=0"}}"#).unwrap();
        assert_eq!(
            decoded,
            Inbound::Message(WireMessage::Offer {
                offer: SessionDescription::offer("v=0"),
                from: None,
            })
        );
    }

    #[test]
    fn test_decode_untyped_and_unknown() {
        assert_eq!(decode(r#"{"from":"Bob"}"#).unwrap(), Inbound::Untyped);
        assert_eq!(decode(r#"{"type":42}"#).unwrap(), Inbound::Untyped);
        assert_eq!(
            decode(r#"{"type":"renegotiate"}"#).unwrap(),
            Inbound::Unknown("renegotiate".to_string())
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode("not json").is_err());
        // Known type, missing required payload
        assert!(decode(r#"{"type":"answer"}"#).is_err());
    }

    #[test]
    fn test_hello_without_name() {
        assert_eq!(
            decode(r#"{"type":"hello"}"#).unwrap(),
            Inbound::Message(WireMessage::Hello { from: None })
        );
        assert_eq!(encode(&WireMessage::Hello { from: None }).unwrap(), r#"{"type":"hello"}"#);
    }

    #[test]
    fn test_kind_names_match_wire() {
        let messages = [
            WireMessage::Hello {
                from: Some("a".into()),
            },
            WireMessage::Answer {
                answer: SessionDescription::answer("v=0"),
            },
            WireMessage::EndCall,
            WireMessage::Ping,
        ];
        for message in messages {
            let value: serde_json::Value =
                serde_json::from_str(&encode(&message).unwrap()).unwrap();
            assert_eq!(value["type"], message.kind());
        }
    }
}
