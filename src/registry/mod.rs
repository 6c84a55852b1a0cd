pub mod client;
pub mod manifest;
pub mod models;

pub use client::{filter_entries, parse_bootstrap, RegistryClient, RegistryError, RegistryQuery};
pub use manifest::{
    fetch_manifest, manifest_capability, normalize_manifest_endpoints, ManifestEndpoints,
};
pub use models::{EntryKind, RegistryEntry, RegistryQueryResponse, TrustInfo, VerificationLevel};
