use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::envelope::{new_envelope, utc_now_rfc3339, Envelope, Payload};

/// Sender id used by this service on every envelope it emits.
pub const SERVICE_ID: &str = "service:mrpd";

/// A provider-declared field: the shape this service emits, or whatever
/// JSON the provider sent instead. Other shapes are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Declared<T> {
    Typed(T),
    Raw(Value),
}

impl<T> Declared<T> {
    pub fn typed(&self) -> Option<&T> {
        match self {
            Self::Typed(t) => Some(t),
            Self::Raw(_) => None,
        }
    }
}

impl<T> From<T> for Declared<T> {
    fn from(value: T) -> Self {
        Self::Typed(value)
    }
}

/// Reads `T`, or its default when the field has another shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// OFFER
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub unit: String,
    pub estimate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Latency {
    pub p50: String,
}

/// Data handling disclosure attached to an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDisclosure {
    pub data_retention_days: u32,
    pub training_use: String,
    #[serde(default)]
    pub subprocessors: Vec<String>,
}

/// A provider's answer to DISCOVER.
///
/// `route_id` has the shape `route:<namespace>/<name>@<version>`. It is
/// optional here so an offer lacking one can be reported instead of
/// rejected during decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Declared<Cost>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Declared<Latency>>,
    #[serde(default, deserialize_with = "lenient")]
    pub proofs: Vec<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<Declared<RiskDisclosure>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferPayload {
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// EVIDENCE
// ---------------------------------------------------------------------------

/// Reference to a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub uri: String,
    /// `sha256:<hex>`
    pub hash: String,
    pub size: u64,
    pub mime: String,
}

/// One execution output. `type` selects the shape; unknown shapes are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutputItem {
    pub fn markdown(text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("value".into(), Value::String(text.into()));
        Self {
            kind: "markdown".into(),
            fields,
        }
    }

    pub fn artifact(artifact: &ArtifactRef) -> Self {
        let fields = match serde_json::to_value(artifact) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            kind: "artifact".into(),
            fields,
        }
    }

    pub fn is_artifact(&self) -> bool {
        self.kind == "artifact"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub citations: Vec<String>,
    pub timestamp: String,
    #[serde(default)]
    pub source_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in_est: u64,
    pub tokens_out_est: u64,
    pub bytes_in: u64,
    pub bytes_text: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidencePayload {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Declared<Provenance>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Declared<Usage>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// ERROR
// ---------------------------------------------------------------------------

/// Wire error code. Serialized verbatim, e.g. `MRP_INVALID_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MrpErrorCode {
    /// Malformed or schema-invalid envelope, or unknown `route_id`.
    MrpInvalidRequest,
    /// Recognized but unsupported operation.
    MrpNotImplemented,
    /// Unexpected failure executing a recognized route.
    MrpInternalError,
}

impl MrpErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MrpInvalidRequest => "MRP_INVALID_REQUEST",
            Self::MrpNotImplemented => "MRP_NOT_IMPLEMENTED",
            Self::MrpInternalError => "MRP_INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for MrpErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `ERROR` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: MrpErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    /// Non-retryable error with the given message.
    pub fn new(code: MrpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            retry_after_ms: None,
            details: None,
        }
    }

    /// Construct with the canonical message for a given code.
    pub fn canonical(code: MrpErrorCode) -> Self {
        let message = match &code {
            MrpErrorCode::MrpInvalidRequest => "Request is invalid",
            MrpErrorCode::MrpNotImplemented => "Operation is not implemented",
            MrpErrorCode::MrpInternalError => "Internal error",
        };
        Self::new(code, message)
    }

    pub fn retryable(mut self, retry_after_ms: Option<u64>) -> Self {
        self.retryable = true;
        self.retry_after_ms = retry_after_ms;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Build an `ERROR` response to the request identified by `request_msg_id`.
///
/// The timestamp mirrors the request's when it is known and falls back to
/// now. An empty `request_msg_id` (request too broken to carry one) leaves
/// `in_reply_to` unset.
pub fn new_error_envelope(
    request_msg_id: &str,
    request_timestamp: Option<&str>,
    receiver_id: Option<&str>,
    error: ErrorPayload,
) -> Envelope {
    let in_reply_to = Some(request_msg_id).filter(|id| !id.is_empty());
    let mut env = new_envelope(Payload::Error(error), SERVICE_ID, receiver_id, in_reply_to);
    env.timestamp = request_timestamp
        .filter(|ts| !ts.is_empty())
        .map(str::to_string)
        .unwrap_or_else(utc_now_rfc3339);
    env
}
