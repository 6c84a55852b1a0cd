use serde::{Deserialize, Serialize};

use super::request::{DiscoverPayload, ExecutePayload, HelloPayload, NegotiatePayload};
use super::response::{ErrorPayload, EvidencePayload, OfferPayload};

/// Protocol version stamped on every envelope.
pub const MRP_VERSION: &str = "0.1";

/// Content type for envelopes on the wire.
pub const MRP_CONTENT_TYPE: &str = "application/mrp+json";

/// Envelope message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Hello,
    Discover,
    Offer,
    Negotiate,
    Execute,
    Evidence,
    Error,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::Discover => "DISCOVER",
            Self::Offer => "OFFER",
            Self::Negotiate => "NEGOTIATE",
            Self::Execute => "EXECUTE",
            Self::Evidence => "EVIDENCE",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sender or receiver of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
}

impl Party {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Message body, keyed on the wire by `msg_type` with the body under `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", content = "payload", rename_all = "UPPERCASE")]
pub enum Payload {
    Hello(HelloPayload),
    Discover(DiscoverPayload),
    Offer(OfferPayload),
    Negotiate(NegotiatePayload),
    Execute(ExecutePayload),
    Evidence(EvidencePayload),
    Error(ErrorPayload),
}

impl Payload {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Hello(_) => MsgType::Hello,
            Self::Discover(_) => MsgType::Discover,
            Self::Offer(_) => MsgType::Offer,
            Self::Negotiate(_) => MsgType::Negotiate,
            Self::Execute(_) => MsgType::Execute,
            Self::Evidence(_) => MsgType::Evidence,
            Self::Error(_) => MsgType::Error,
        }
    }
}

/// A protocol message.
///
/// Requests never carry `in_reply_to`; every response carries a fresh
/// `msg_id` and sets `in_reply_to` to the triggering request's `msg_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub mrp_version: String,
    pub msg_id: String,
    pub timestamp: String,
    pub sender: Party,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(flatten)]
    pub body: Payload,
}

/// Build an envelope with a fresh `msg_id` and the current UTC timestamp.
///
/// `in_reply_to` is set only when given.
pub fn new_envelope(
    body: Payload,
    sender_id: &str,
    receiver_id: Option<&str>,
    in_reply_to: Option<&str>,
) -> Envelope {
    Envelope {
        mrp_version: MRP_VERSION.to_string(),
        msg_id: new_msg_id(),
        timestamp: utc_now_rfc3339(),
        sender: Party::new(sender_id),
        receiver: receiver_id.map(Party::new),
        in_reply_to: in_reply_to.map(str::to_string),
        body,
    }
}

impl Envelope {
    /// New request envelope (no correlation).
    pub fn request(body: Payload, sender_id: &str) -> Self {
        new_envelope(body, sender_id, None, None)
    }

    /// New response correlated to `request`, addressed back to its sender.
    pub fn reply_to(request: &Envelope, body: Payload, sender_id: &str) -> Self {
        new_envelope(
            body,
            sender_id,
            Some(&request.sender.id),
            Some(&request.msg_id),
        )
    }

    pub fn msg_type(&self) -> MsgType {
        self.body.msg_type()
    }

    /// Header fields only, for audit records.
    pub fn meta(&self) -> EnvelopeMeta {
        EnvelopeMeta {
            mrp_version: self.mrp_version.clone(),
            msg_id: self.msg_id.clone(),
            msg_type: self.msg_type(),
            timestamp: self.timestamp.clone(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            in_reply_to: self.in_reply_to.clone(),
        }
    }
}

/// Envelope header without the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub mrp_version: String,
    pub msg_id: String,
    pub msg_type: MsgType,
    pub timestamp: String,
    pub sender: Party,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Party>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

pub fn new_msg_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn utc_now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
