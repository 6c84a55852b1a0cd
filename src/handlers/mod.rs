pub mod discover;
pub mod execute;
pub mod hello;
pub mod negotiate;

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::config::MrpConfig;
use crate::error::TransportError;
use crate::protocol::{
    new_error_envelope, Envelope, ErrorPayload, MrpErrorCode, MsgType, Payload,
};
use crate::schema;
use crate::store::ArtifactStore;

/// What the built-in provider needs to answer requests.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub fetch_client: Client,
    pub artifacts: ArtifactStore,
    pub fetch_timeout: Duration,
}

impl ProviderState {
    pub fn from_config(config: &MrpConfig) -> Result<Self, TransportError> {
        Ok(Self {
            fetch_client: crate::http::fetch_client()?,
            artifacts: ArtifactStore::new(config.artifact_dir.clone()),
            fetch_timeout: config.fetch_timeout,
        })
    }
}

/// Answer one raw request posted to the endpoint for `expected`.
///
/// Always returns an envelope: schema violations, undecodable payloads and
/// a `msg_type` that does not belong on this endpoint all become
/// `MRP_INVALID_REQUEST` errors correlated to whatever the request carried.
pub async fn dispatch(expected: MsgType, raw: &Value, state: &ProviderState) -> Envelope {
    if let Err(e) = schema::validate_envelope(raw) {
        tracing::debug!(error = %e, "rejecting non-conformant envelope");
        return reject_raw(raw, e.to_string());
    }

    let request: Envelope = match serde_json::from_value(raw.clone()) {
        Ok(env) => env,
        Err(e) => return reject_raw(raw, format!("invalid {expected} payload: {e}")),
    };

    if request.msg_type() != expected {
        return error_reply(
            &request,
            ErrorPayload::new(
                MrpErrorCode::MrpInvalidRequest,
                format!("expected {expected}, got {}", request.msg_type()),
            ),
        );
    }

    tracing::info!(msg_type = %expected, msg_id = %request.msg_id, sender = %request.sender.id, "request");

    match &request.body {
        Payload::Hello(_) => hello::handle(&request).await,
        Payload::Discover(payload) => discover::handle(&request, payload).await,
        Payload::Negotiate(_) => negotiate::handle(&request).await,
        Payload::Execute(payload) => execute::handle(&request, payload, state).await,
        // Response types never reach here: no endpoint expects them.
        Payload::Offer(_) | Payload::Evidence(_) | Payload::Error(_) => error_reply(
            &request,
            ErrorPayload::canonical(MrpErrorCode::MrpInvalidRequest),
        ),
    }
}

/// `ERROR` reply to a decoded request.
pub fn error_reply(request: &Envelope, error: ErrorPayload) -> Envelope {
    new_error_envelope(
        &request.msg_id,
        Some(&request.timestamp),
        Some(&request.sender.id),
        error,
    )
}

/// `MRP_INVALID_REQUEST` for a body that did not decode, correlated on a
/// best-effort basis from the raw JSON.
pub fn reject_raw(raw: &Value, message: impl Into<String>) -> Envelope {
    let field = |key: &str| raw.get(key).and_then(Value::as_str);
    let sender = raw
        .get("sender")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str);
    new_error_envelope(
        field("msg_id").unwrap_or(""),
        field("timestamp"),
        sender,
        ErrorPayload::new(MrpErrorCode::MrpInvalidRequest, message),
    )
}
