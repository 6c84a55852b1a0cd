use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::config::MrpConfig;
use crate::error::{MrpError, TransportError};
use crate::http;

use super::models::{RegistryEntry, RegistryQueryResponse};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("bootstrap registry source {0} did not return a JSON array")]
    BootstrapNotList(String),
    #[error("registry query failed ({primary}); bootstrap fallback also failed: {source}")]
    Fallback {
        primary: String,
        #[source]
        source: Box<RegistryError>,
    },
    #[error("manifest {0} is not a JSON object")]
    ManifestNotObject(String),
    #[error("manifest {manifest_url} declares root-relative endpoint {endpoint:?} but has no http(s) origin to resolve it against")]
    UnresolvableEndpoint {
        manifest_url: String,
        endpoint: String,
    },
}

impl From<RegistryError> for MrpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Transport(e) => MrpError::Transport(e),
            RegistryError::Fallback { primary, source } => {
                MrpError::Transport(TransportError::SourcesExhausted {
                    primary,
                    fallback: source.to_string(),
                })
            }
            other => MrpError::Configuration(other.to_string()),
        }
    }
}

/// Parameters of a registry query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryQuery {
    pub capability: Option<String>,
    pub policy: Option<String>,
    pub limit: u32,
    pub cursor: Option<String>,
}

impl Default for RegistryQuery {
    fn default() -> Self {
        Self {
            capability: None,
            policy: None,
            limit: 50,
            cursor: None,
        }
    }
}

impl RegistryQuery {
    pub fn new(capability: Option<&str>, policy: Option<&str>, limit: u32) -> Self {
        Self {
            capability: capability.filter(|s| !s.is_empty()).map(str::to_string),
            policy: policy.filter(|s| !s.is_empty()).map(str::to_string),
            limit,
            cursor: None,
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.limit.to_string())];
        if let Some(c) = &self.capability {
            params.push(("capability", c.clone()));
        }
        if let Some(p) = &self.policy {
            params.push(("policy", p.clone()));
        }
        if let Some(cursor) = &self.cursor {
            params.push(("cursor", cursor.clone()));
        }
        params
    }
}

/// Client of a remote MRP registry, with a raw-list bootstrap fallback.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    bootstrap_raw: Option<String>,
    timeout: Duration,
    http: Client,
}

impl RegistryClient {
    pub fn new(
        base_url: &str,
        bootstrap_raw: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bootstrap_raw: bootstrap_raw.filter(|s| !s.is_empty()),
            timeout,
            http: http::protocol_client()?,
        })
    }

    pub fn from_config(config: &MrpConfig) -> Result<Self, RegistryError> {
        Self::new(
            &config.registry_base,
            config.bootstrap_raw.clone(),
            config.registry_timeout,
        )
    }

    /// Query the registry API, falling back to the bootstrap raw list on any
    /// transport, HTTP or decoding failure.
    ///
    /// Without a bootstrap source the fallback yields an empty result set.
    pub async fn query(&self, query: &RegistryQuery) -> Result<RegistryQueryResponse, RegistryError> {
        let primary_err = match self.query_primary(query).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        tracing::warn!(
            registry = %self.base_url,
            error = %primary_err,
            "registry query failed; using bootstrap source"
        );

        let Some(source) = self.bootstrap_raw.as_deref() else {
            tracing::warn!("no bootstrap registry source configured; returning no results");
            return Ok(RegistryQueryResponse::from_results(Vec::new()));
        };

        let entries = self
            .fetch_bootstrap_entries(source)
            .await
            .map_err(|e| RegistryError::Fallback {
                primary: primary_err.to_string(),
                source: Box::new(e),
            })?;

        let mut results = filter_entries(entries, query.capability.as_deref(), query.policy.as_deref());
        results.truncate(query.limit as usize);
        Ok(RegistryQueryResponse::from_results(results))
    }

    async fn query_primary(&self, query: &RegistryQuery) -> Result<RegistryQueryResponse, TransportError> {
        let url = format!("{}/mrp/registry/query", self.base_url);
        tracing::debug!(%url, ?query, "querying registry");

        let reply = http::get(&self.http, &url, &query.params(), "application/json", self.timeout)
            .await?
            .ensure_success()?;

        serde_json::from_str(&reply.body).map_err(|source| TransportError::Decode { url, source })
    }

    async fn fetch_bootstrap_entries(&self, source: &str) -> Result<Vec<RegistryEntry>, RegistryError> {
        tracing::info!(%source, "loading bootstrap registry");
        let payload = http::load_json(&self.http, source, "application/json", self.timeout).await?;
        parse_bootstrap(source, payload)
    }
}

/// Turn a raw bootstrap array into routable, de-duplicated entries.
///
/// Items without `manifest_url` are dropped; duplicates by `id` keep the
/// first occurrence in input order.
pub fn parse_bootstrap(source: &str, payload: Value) -> Result<Vec<RegistryEntry>, RegistryError> {
    let Value::Array(items) = payload else {
        return Err(RegistryError::BootstrapNotList(source.to_string()));
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for item in items {
        let has_manifest = item
            .get("manifest_url")
            .and_then(Value::as_str)
            .is_some_and(|u| !u.is_empty());
        if !has_manifest {
            continue;
        }

        let entry: RegistryEntry = match serde_json::from_value(item) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed bootstrap entry");
                continue;
            }
        };

        if seen.insert(entry.id.clone()) {
            entries.push(entry);
        }
    }

    Ok(entries)
}

/// Exact-membership capability/policy filter, order preserving.
pub fn filter_entries(
    entries: Vec<RegistryEntry>,
    capability: Option<&str>,
    policy: Option<&str>,
) -> Vec<RegistryEntry> {
    entries
        .into_iter()
        .filter(|e| capability.map_or(true, |c| e.capabilities.iter().any(|x| x == c)))
        .filter(|e| policy.map_or(true, |p| e.policies.iter().any(|x| x == p)))
        .collect()
}
