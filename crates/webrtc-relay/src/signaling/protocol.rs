//! Signaling wire format
//!
//! Every message is one JSON object:
//!
//! ```json
//! { "signal": { "type": "offer", "sdp": "v=0..." }, "to": "", "from": "peer-1" }
//! ```
//!
//! Field presence is significant. A message without `signal` carrying only
//! `from` is the server's hello announcing our own identity. Empty strings
//! are never serialized.

use crate::peer::CandidateInit;
use serde::{Deserialize, Serialize};

/// SDP/ICE payload of a signaling message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebrtcSignal {
    /// "offer" or "answer"; absent for candidates
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sdp: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub candidate: String,

    #[serde(rename = "sdpMid", default, skip_serializing_if = "String::is_empty")]
    pub sdp_mid: String,

    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Envelope exchanged with the signaling server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<WebrtcSignal>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
}

/// Inbound message after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Identity announcement: `from` is our own id
    Hello { id: String },
    /// Remote peer wants to start a call
    Offer { from: String, sdp: String },
    /// Answer to an offer; this node never sends offers
    Answer { from: String },
    /// Trickled remote candidate
    Candidate { from: String, candidate: CandidateInit },
    /// Anything else
    Ignored,
}

impl ClientMessage {
    /// Classify an inbound message by which fields are present
    pub fn classify(&self) -> Inbound {
        let signal = match &self.signal {
            Some(signal) => signal,
            None => {
                if !self.from.is_empty() && self.to.trim().is_empty() {
                    return Inbound::Hello {
                        id: self.from.clone(),
                    };
                }
                return Inbound::Ignored;
            }
        };

        match signal.kind.as_str() {
            "offer" if !signal.sdp.is_empty() => Inbound::Offer {
                from: self.from.clone(),
                sdp: signal.sdp.clone(),
            },
            "answer" => Inbound::Answer {
                from: self.from.clone(),
            },
            "" if !signal.candidate.is_empty() => Inbound::Candidate {
                from: self.from.clone(),
                candidate: signal.candidate_init(),
            },
            _ => Inbound::Ignored,
        }
    }

    /// Answer addressed to `to`
    pub fn answer(to: &str, sdp: String) -> Self {
        Self {
            signal: Some(WebrtcSignal {
                kind: "answer".to_string(),
                sdp,
                ..Default::default()
            }),
            to: to.to_string(),
            from: String::new(),
        }
    }

    /// Local candidate addressed to `to`
    pub fn candidate(to: &str, candidate: &CandidateInit) -> Self {
        Self {
            signal: Some(WebrtcSignal {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone().unwrap_or_default(),
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            }),
            to: to.to_string(),
            from: String::new(),
        }
    }
}

impl WebrtcSignal {
    /// Candidate fields as the engine expects them; an empty mid is absent
    pub fn candidate_init(&self) -> CandidateInit {
        CandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: if self.sdp_mid.is_empty() {
                None
            } else {
                Some(self.sdp_mid.clone())
            },
            sdp_mline_index: self.sdp_mline_index,
        }
    }
}
