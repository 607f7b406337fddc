//! Signaling wire messages
//!
//! One message per WebSocket text frame, a JSON object dispatched on its
//! `type` tag. Field names follow the original browser-facing protocol
//! (camelCase).

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::registry::{PeerId, PeerInfo};

/// ICE candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Client-to-server request frames — the closed set of dispatch kinds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Publish handshake: attach a producer session and set the username
    Connect {
        #[serde(default)]
        id: Option<PeerId>,
        username: String,
        sdp: String,
    },
    /// Membership snapshot request
    GetPeers {
        #[serde(default)]
        id: Option<PeerId>,
    },
    /// Trickled candidate for the sender's own producer session
    Ice {
        #[serde(default)]
        id: Option<PeerId>,
        ice: IceCandidate,
    },
    /// Pull a producer's current tracks over a dedicated consumer session
    #[serde(rename_all = "camelCase")]
    Subscribe {
        consumer_id: PeerId,
        producer_id: PeerId,
        sdp: String,
    },
    /// Trickled candidate for a specific consumer session
    #[serde(rename_all = "camelCase")]
    ProducerIce {
        consumer_id: PeerId,
        producer_id: PeerId,
        ice: IceCandidate,
    },
    /// Trickled candidate for a specific consumer session
    #[serde(rename_all = "camelCase")]
    ConsumerIce {
        consumer_id: PeerId,
        producer_id: PeerId,
        ice: IceCandidate,
    },
}

/// Tags the router dispatches on; anything else takes the legacy relay path.
const KNOWN_KINDS: [&str; 6] = [
    "connect",
    "getPeers",
    "ice",
    "subscribe",
    "producerIce",
    "consumerIce",
];

/// Server-to-client reply frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Sent immediately after accept with the assigned id
    Welcome { id: PeerId },
    /// Answer SDP completing the sender's publish handshake
    Answer { sdp: String },
    /// Membership snapshot (every registered peer except the requester)
    Peers { peers: Vec<PeerInfo> },
    /// Answer SDP for a consumer session plus the producer's identity
    #[serde(rename_all = "camelCase")]
    Subscribed {
        sdp: String,
        producer_id: PeerId,
        producer_username: Option<String>,
    },
    /// Request failed; carries the taxonomy code
    Error { code: u32, message: String },
}

impl ServerFrame {
    pub fn error(err: &AppError) -> Self {
        ServerFrame::Error {
            code: err.wire_code(),
            message: err.to_string(),
        }
    }
}

/// Result of classifying one inbound text frame
#[derive(Debug)]
pub enum DecodedFrame {
    /// A recognized request kind with valid fields
    Request(ClientFrame),
    /// Valid JSON object with a type tag outside the closed set.
    ///
    /// Legacy compatibility fallback: the frame is relayed verbatim
    /// room-wide. Hazardous by design — kept only because old clients
    /// depend on it.
    Legacy { kind: String },
}

/// Classify an inbound frame.
///
/// Unparseable JSON, a missing tag, or a known tag with bad fields is
/// `Malformed`; an unknown tag is the explicit legacy relay case.
pub fn decode_frame(text: &str) -> Result<DecodedFrame> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| AppError::Malformed(format!("invalid JSON: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AppError::Malformed("missing type tag".to_string()))?
        .to_string();

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Ok(DecodedFrame::Legacy { kind });
    }

    let frame: ClientFrame = serde_json::from_value(value)
        .map_err(|e| AppError::Malformed(format!("bad {} frame: {}", kind, e)))?;
    Ok(DecodedFrame::Request(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_parses() {
        let id = PeerId::new();
        let text = format!(
            r#"{{"type":"connect","id":"{}","username":"alice","sdp":"v=0..."}}"#,
            id
        );
        match decode_frame(&text).unwrap() {
            DecodedFrame::Request(ClientFrame::Connect { id: got, username, sdp }) => {
                assert_eq!(got, Some(id));
                assert_eq!(username, "alice");
                assert_eq!(sdp, "v=0...");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn subscribe_frame_uses_camel_case() {
        let consumer = PeerId::new();
        let producer = PeerId::new();
        let text = format!(
            r#"{{"type":"subscribe","consumerId":"{}","producerId":"{}","sdp":"v=0"}}"#,
            consumer, producer
        );
        match decode_frame(&text).unwrap() {
            DecodedFrame::Request(ClientFrame::Subscribe {
                consumer_id,
                producer_id,
                ..
            }) => {
                assert_eq!(consumer_id, consumer);
                assert_eq!(producer_id, producer);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn ice_candidate_wire_field_names() {
        let text = r#"{"type":"ice","ice":{"candidate":"candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match decode_frame(text).unwrap() {
            DecodedFrame::Request(ClientFrame::Ice { ice, .. }) => {
                assert_eq!(ice.sdp_mid.as_deref(), Some("0"));
                assert_eq!(ice.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unknown_tag_is_legacy_not_malformed() {
        let decoded = decode_frame(r#"{"type":"chatMessage","text":"hi"}"#).unwrap();
        assert!(matches!(decoded, DecodedFrame::Legacy { kind } if kind == "chatMessage"));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = decode_frame("{not json").unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn missing_tag_is_malformed() {
        let err = decode_frame(r#"{"sdp":"v=0"}"#).unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn known_tag_with_missing_fields_is_malformed() {
        // "subscribe" without producerId must not fall through to the relay
        let err = decode_frame(r#"{"type":"subscribe","sdp":"v=0"}"#).unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn server_frames_serialize_with_tags() {
        let id = PeerId::new();
        let json = serde_json::to_value(ServerFrame::Welcome { id }).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["id"], id.to_string());

        let json = serde_json::to_value(ServerFrame::Subscribed {
            sdp: "v=0".into(),
            producer_id: id,
            producer_username: Some("alice".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["producerId"], id.to_string());
        assert_eq!(json["producerUsername"], "alice");

        let json = serde_json::to_value(ServerFrame::error(&AppError::not_found("peer"))).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 404);
    }

    #[test]
    fn peers_frame_lists_entries() {
        let id = PeerId::new();
        let frame = ServerFrame::Peers {
            peers: vec![PeerInfo {
                id,
                username: Some("bob".into()),
            }],
        };
        let json = serde_json::to_value(frame).unwrap();
        assert_eq!(json["type"], "peers");
        assert_eq!(json["peers"][0]["id"], id.to_string());
        assert_eq!(json["peers"][0]["username"], "bob");
    }
}
