//! Write-once local stores for artifacts and evidence bundles.
//!
//! Artifacts are keyed by content hash and evidence bundles by job id. A key
//! always maps to the same bytes, so concurrent writers need no locking.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::protocol::ArtifactRef;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Content-addressed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `data` under `<sha256><suffix>` and return its reference.
    pub async fn store_bytes(
        &self,
        data: &[u8],
        mime: &str,
        suffix: &str,
    ) -> Result<ArtifactRef, StoreError> {
        if !is_safe_key(suffix.trim_start_matches('.')) && !suffix.is_empty() {
            return Err(StoreError::InvalidKey(suffix.to_string()));
        }
        let hash = sha256_hex(data);
        let path = self.root.join(format!("{hash}{suffix}"));
        write_file(&self.root, &path, data).await?;

        Ok(ArtifactRef {
            uri: file_uri(&path),
            hash: format!("sha256:{hash}"),
            size: data.len() as u64,
            mime: mime.to_string(),
        })
    }

    /// Store `value` as pretty-printed JSON.
    pub async fn store_json<T: Serialize>(&self, value: &T) -> Result<ArtifactRef, StoreError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.store_bytes(&data, "application/json", ".json").await
    }
}

/// Evidence bundles, one `<job_id>.json` file per job.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_key(job_id) {
            return Err(StoreError::InvalidKey(job_id.to_string()));
        }
        Ok(self.root.join(format!("{job_id}.json")))
    }

    pub async fn write_bundle<T: Serialize>(
        &self,
        job_id: &str,
        bundle: &T,
    ) -> Result<PathBuf, StoreError> {
        let path = self.path_for(job_id)?;
        let data = serde_json::to_vec_pretty(bundle)?;
        write_file(&self.root, &path, &data).await?;
        Ok(path)
    }
}

/// Keys become file names: no separators, no leading dot, no `..`.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

async fn write_file(root: &Path, path: &Path, data: &[u8]) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| StoreError::Io {
            path: root.to_path_buf(),
            source,
        })?;
    tokio::fs::write(path, data)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn file_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", absolute.display()))
}
