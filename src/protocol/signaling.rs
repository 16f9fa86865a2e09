//! # Signaling Envelopes
//!
//! JSON messages relayed between the robot and the operator by the signaling
//! relay. Every message is an envelope:
//!
//! ```json
//! {"to": "<peer>", "from": "<peer>", "type": "rtc", "message": <payload>}
//! ```
//!
//! `to`, `from` and `type` may be omitted. The payload is one of:
//!
//! - an SDP description: `{"type": "offer" | "answer", "sdp": "..."}`
//! - an ICE candidate: `{"candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0}`
//! - a bare notice string, currently only `"failure"`

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::PeerId;

/// Envelope type routed to the negotiation engine
pub const RTC_KIND: &str = "rtc";

/// Notice sent to the operator when the peer session failed
pub const FAILURE_NOTICE: &str = "failure";

/// SDP description role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as exchanged by browsers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Envelope body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalingPayload {
    Description(SessionDescription),
    Candidate(IceCandidate),
    Notice(String),
}

/// A single message on the signaling relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub message: SignalingPayload,
}

impl SignalingEnvelope {
    /// Answer addressed to the operator that sent the offer
    pub fn answer(to: PeerId, sdp: impl Into<String>) -> Self {
        Self::rtc(to, SignalingPayload::Description(SessionDescription::answer(sdp)))
    }

    /// Trickled local ICE candidate
    pub fn candidate(to: PeerId, candidate: IceCandidate) -> Self {
        Self::rtc(to, SignalingPayload::Candidate(candidate))
    }

    /// Failure notice; carries no `type` so the relay hands it to the
    /// operator verbatim
    pub fn failure(to: PeerId) -> Self {
        Self {
            to: Some(to),
            from: None,
            kind: None,
            message: SignalingPayload::Notice(FAILURE_NOTICE.to_string()),
        }
    }

    fn rtc(to: PeerId, message: SignalingPayload) -> Self {
        Self {
            to: Some(to),
            from: None,
            kind: Some(RTC_KIND.to_string()),
            message,
        }
    }

    /// Whether the envelope belongs to the peer negotiation
    pub fn is_rtc(&self) -> bool {
        self.kind.as_deref() == Some(RTC_KIND)
    }

    /// Parse an envelope received from the relay
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize for the relay
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
