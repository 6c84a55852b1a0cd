use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::http;

use super::client::RegistryError;

const MANIFEST_ACCEPT: &str = "application/mrp-manifest+json, application/json";

/// Fetch a provider manifest from a `file://` or `http(s)://` URL.
pub async fn fetch_manifest(
    client: &Client,
    manifest_url: &str,
    timeout: Duration,
) -> Result<Value, RegistryError> {
    tracing::debug!(%manifest_url, "fetching manifest");
    let manifest = http::load_json(client, manifest_url, MANIFEST_ACCEPT, timeout).await?;
    if !manifest.is_object() {
        return Err(RegistryError::ManifestNotObject(manifest_url.to_string()));
    }
    Ok(manifest)
}

/// Rewrite root-relative `endpoints.*` entries (`/mrp/discover`) to absolute
/// URLs on the manifest's origin (scheme, host and port).
///
/// Already-absolute and relative-but-not-rooted values pass through, so the
/// operation is idempotent. A manifest without an http(s) origin (e.g. read
/// from `file://`) cannot resolve a root-relative endpoint and is rejected.
pub fn normalize_manifest_endpoints(
    mut manifest: Value,
    manifest_url: &str,
) -> Result<Value, RegistryError> {
    let origin = Url::parse(manifest_url)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .map(|u| u.origin().ascii_serialization());

    if let Some(endpoints) = manifest.get_mut("endpoints").and_then(Value::as_object_mut) {
        for value in endpoints.values_mut() {
            let path = match value.as_str() {
                Some(p) if is_root_relative(p) => p.to_string(),
                _ => continue,
            };
            let Some(origin) = origin.as_deref() else {
                return Err(RegistryError::UnresolvableEndpoint {
                    manifest_url: manifest_url.to_string(),
                    endpoint: path,
                });
            };
            *value = Value::String(format!("{origin}{path}"));
        }
    }

    Ok(manifest)
}

fn is_root_relative(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//")
}

/// The endpoints a routable manifest must expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEndpoints {
    pub discover: String,
    pub execute: String,
    pub negotiate: Option<String>,
}

impl ManifestEndpoints {
    /// Read `endpoints.discover` and `endpoints.execute`; `Err` names what is missing.
    pub fn from_manifest(manifest: &Value) -> Result<Self, String> {
        let endpoint = |name: &str| {
            manifest
                .get("endpoints")
                .and_then(|e| e.get(name))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match (endpoint("discover"), endpoint("execute")) {
            (Some(discover), Some(execute)) => Ok(Self {
                discover,
                execute,
                negotiate: endpoint("negotiate"),
            }),
            (discover, execute) => {
                let mut missing = Vec::new();
                if discover.is_none() {
                    missing.push("endpoints.discover");
                }
                if execute.is_none() {
                    missing.push("endpoints.execute");
                }
                Err(format!("manifest is missing {}", missing.join(" and ")))
            }
        }
    }
}

/// `capability` (or `capability_id`) advertised by a manifest.
pub fn manifest_capability(manifest: &Value) -> Option<&str> {
    manifest
        .get("capability")
        .or_else(|| manifest.get("capability_id"))
        .and_then(Value::as_str)
}
