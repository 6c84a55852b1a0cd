//! Built-in reference provider for the `summarize_url` capability.

pub mod text;

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::protocol::{
    find_url_input, utc_now_rfc3339, Cost, DiscoverPayload, InputItem, Latency, Offer,
    OutputItem, Provenance, RiskDisclosure, Usage,
};
use crate::store::{ArtifactStore, StoreError};

pub const CAPABILITY: &str = "summarize_url";
pub const ROUTE_ID: &str = "route:mrpd/summarize_url@0.1";
pub const POLICY: &str = "no_pii";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("missing url input")]
    MissingInput,
    #[error("fetch failed: {0}")]
    Fetch(#[from] TransportError),
    #[error("artifact storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Result of one `summarize_url` execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub outputs: Vec<OutputItem>,
    pub provenance: Provenance,
    pub usage: Usage,
}

/// Manifest for the built-in provider. An empty `base_url` yields
/// root-relative endpoints, resolved by clients against the manifest URL.
pub fn provider_manifest(base_url: &str) -> Value {
    let base = base_url.trim_end_matches('/');
    json!({
        "capability_id": "capability:mrp/summarize_url",
        "capability": CAPABILITY,
        "version": "0.1",
        "tags": ["mrp", "summarize", "web"],
        "inputs": [{"type": "url"}],
        "outputs": [{"type": "markdown"}, {"type": "artifact"}],
        "constraints": {"policy": [POLICY]},
        "cost": {"unit": "usd", "estimate": 0.0},
        "latency": {"p50": "0ms"},
        "proofs_required": [],
        "endpoints": {
            "discover": format!("{base}/mrp/discover"),
            "negotiate": format!("{base}/mrp/negotiate"),
            "execute": format!("{base}/mrp/execute"),
        },
    })
}

/// The single static offer answered to every DISCOVER.
pub fn offers_for_discover(_payload: &DiscoverPayload) -> Vec<Offer> {
    vec![Offer {
        route_id: Some(ROUTE_ID.to_string()),
        capability: Some(CAPABILITY.to_string()),
        confidence: Some(0.9),
        cost: Some(
            Cost {
                unit: "usd".into(),
                estimate: 0.0,
            }
            .into(),
        ),
        latency: Some(Latency { p50: "0ms".into() }.into()),
        proofs: Vec::new(),
        policy: vec![POLICY.to_string()],
        risk: Some(
            RiskDisclosure {
                data_retention_days: 0,
                training_use: "none".into(),
                subprocessors: Vec::new(),
            }
            .into(),
        ),
        endpoint: Some("/mrp/execute".into()),
        extra: Default::default(),
    }]
}

/// Fetch the `url` input, extract text, store it as an artifact and return
/// a bounded markdown summary with provenance and usage counters.
pub async fn execute_summarize_url(
    inputs: &[InputItem],
    client: &Client,
    store: &ArtifactStore,
    timeout: Duration,
) -> Result<Execution, ProviderError> {
    let url = find_url_input(inputs).ok_or(ProviderError::MissingInput)?;

    tracing::info!(%url, "fetching content to summarize");
    let fetched = fetch(client, url, timeout).await?;
    let fetched_at = utc_now_rfc3339();

    let extracted = if fetched.content_type.contains("text/html") {
        text::strip_html(&String::from_utf8_lossy(&fetched.body))
    } else {
        String::from_utf8_lossy(&fetched.body).into_owned()
    };

    let artifact = store
        .store_bytes(extracted.as_bytes(), "text/plain", ".txt")
        .await?;

    let summary = text::summarize(&extracted);
    let usage = Usage {
        tokens_in_est: text::approx_tokens(&extracted),
        tokens_out_est: text::approx_tokens(&summary),
        bytes_in: fetched.body.len() as u64,
        bytes_text: extracted.len() as u64,
    };

    Ok(Execution {
        outputs: vec![
            OutputItem::markdown(format!("## Summary\n\n{summary}\n")),
            OutputItem::artifact(&artifact),
        ],
        provenance: Provenance {
            citations: vec![url.to_string()],
            timestamp: fetched_at,
            source_hashes: vec![artifact.hash.clone()],
        },
        usage,
    })
}

struct Fetched {
    content_type: String,
    body: Vec<u8>,
}

async fn fetch(client: &Client, url: &str, timeout: Duration) -> Result<Fetched, TransportError> {
    let request_err = |source: reqwest::Error| TransportError::Request {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(request_err)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let body = response.bytes().await.map_err(request_err)?.to_vec();

    Ok(Fetched { content_type, body })
}
