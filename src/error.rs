use std::path::PathBuf;

use crate::scoring::NearMiss;
use crate::store::StoreError;

/// Network, timeout, file or non-2xx failure of a single call.
///
/// Terminal per call: nothing in the crate retries a transport error
/// except the operator-paced publish poll.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot read {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// The registry and its bootstrap source both failed.
    #[error("registry query failed ({primary}); bootstrap fallback also failed: {fallback}")]
    SourcesExhausted { primary: String, fallback: String },
}

/// No routable or satisfying provider.
#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    #[error("no registry entries matched (routable entries need a manifest_url)")]
    NoCandidates,
    #[error("no candidate satisfied the requested requirements ({} near misses)", near_misses.len())]
    NoneSatisfied { near_misses: Vec<NearMiss> },
}

/// Crate-wide error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum MrpError {
    /// Malformed or non-conformant envelope.
    #[error("invalid envelope: {0}")]
    Validation(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    /// Manifest missing required endpoints, unusable bootstrap source, etc.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The provider answered with an ERROR envelope; `payload` is verbatim.
    #[error("provider returned {code}: {message}")]
    Provider {
        code: String,
        message: String,
        payload: serde_json::Value,
    },
}

impl MrpError {
    /// Wrap a provider's ERROR payload without reinterpreting it.
    pub fn provider(payload: serde_json::Value) -> Self {
        let field = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string()
        };
        Self::Provider {
            code: field("code"),
            message: field("message"),
            payload,
        }
    }
}

/// Render an error and its `source()` chain, one cause per line.
pub fn causal_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(e) = cause {
        out.push_str("\n  caused by: ");
        out.push_str(&e.to_string());
        cause = e.source();
    }
    out
}
