//! Relay message shapes
//!
//! Every relay message is a JSON object carrying exactly one of:
//! `sdp` (session description), `candidate` (ICE candidate), `error`, or
//! `type: "camera_info"` with a `camera` object. Outbound messages are only
//! ever descriptions or candidates.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer
    Offer,
    /// Answer
    Answer,
}

/// Session description as carried in `{"sdp": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as carried in `{"candidate": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,

    /// Index of the m-line the candidate belongs to; `0` is a valid index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Message sent from the viewer to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundMessage {
    /// `{"sdp": {"type": ..., "sdp": ...}}`
    #[serde(rename = "sdp")]
    Description(SessionDescription),
    /// `{"candidate": {"candidate": ..., "sdpMid": ..., "sdpMLineIndex": ...}}`
    #[serde(rename = "candidate")]
    Candidate(IceCandidate),
}

impl OutboundMessage {
    /// Serialize to the relay's JSON text form
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

/// Message received from the relay, classified by shape
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Informational camera metadata
    CameraInfo(Value),
    /// Remote session description
    Description(SessionDescription),
    /// Remote ICE candidate
    Candidate(IceCandidate),
    /// Relay-reported failure
    Error(String),
    /// Any other shape (ignored for forward compatibility)
    Unknown(Value),
}

impl InboundMessage {
    /// Parse and classify a relay text message
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseError`] if the text is not JSON, or if a recognised
    /// field carries a payload of the wrong shape.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::ParseError(format!("Invalid JSON: {}", e)))?;

        let obj = match value {
            Value::Object(obj) => obj,
            other => return Ok(InboundMessage::Unknown(other)),
        };

        if obj.get("type").and_then(Value::as_str) == Some("camera_info") {
            let camera = obj.get("camera").cloned().unwrap_or(Value::Null);
            return Ok(InboundMessage::CameraInfo(camera));
        }

        if let Some(sdp) = present(&obj, "sdp") {
            let desc: SessionDescription = serde_json::from_value(sdp.clone())
                .map_err(|e| Error::ParseError(format!("Invalid sdp payload: {}", e)))?;
            return Ok(InboundMessage::Description(desc));
        }

        if let Some(candidate) = candidate_payload(&obj) {
            let candidate: IceCandidate = serde_json::from_value(Value::Object(candidate))
                .map_err(|e| Error::ParseError(format!("Invalid candidate payload: {}", e)))?;
            return Ok(InboundMessage::Candidate(candidate));
        }

        if let Some(error) = present(&obj, "error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(InboundMessage::Error(message));
        }

        Ok(InboundMessage::Unknown(Value::Object(obj)))
    }
}

/// Field lookup treating `null` as absent
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

/// Locate a candidate payload, nested or flat
///
/// A payload qualifies when it has a `candidate` and an `sdpMLineIndex` key.
/// The index key only has to exist: `0` and `null` both qualify.
fn candidate_payload(obj: &Map<String, Value>) -> Option<Map<String, Value>> {
    match present(obj, "candidate")? {
        Value::Object(nested) if nested.contains_key("sdpMLineIndex") => {
            Some(nested.clone())
        }
        Value::String(_) if obj.contains_key("sdpMLineIndex") => {
            let mut flat = Map::new();
            for key in ["candidate", "sdpMid", "sdpMLineIndex"] {
                if let Some(v) = obj.get(key) {
                    flat.insert(key.to_string(), v.clone());
                }
            }
            Some(flat)
        }
        _ => None,
    }
}
