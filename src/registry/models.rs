use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How strongly an entry's claims have been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    SelfAsserted,
    RegistryAttested,
    ThirdPartyIndexed,
    ThirdPartyAudited,
}

impl VerificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfAsserted => "self_asserted",
            Self::RegistryAttested => "registry_attested",
            Self::ThirdPartyIndexed => "third_party_indexed",
            Self::ThirdPartyAudited => "third_party_audited",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Provider,
    Indexed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustInfo {
    /// In `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub proofs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<VerificationLevel>,
}

/// A capability provider record, as returned by the registry.
///
/// Entries without `manifest_url` are discovery leads and are never routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    /// Merge key for provider vs. indexed duplicates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub proofs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<TrustInfo>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RegistryEntry {
    /// Routable entries carry a non-empty `manifest_url`.
    pub fn is_routable(&self) -> bool {
        self.manifest_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Response of `GET /mrp/registry/query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryQueryResponse {
    #[serde(default = "default_version")]
    pub mrp_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(default)]
    pub results: Vec<RegistryEntry>,
}

impl RegistryQueryResponse {
    pub fn from_results(results: Vec<RegistryEntry>) -> Self {
        Self {
            mrp_version: default_version(),
            next_page: None,
            results,
        }
    }
}

fn default_version() -> String {
    crate::protocol::MRP_VERSION.to_string()
}
