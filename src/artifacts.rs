//! Artifact store client and report asset publication.
//!
//! Raw fetched documents and rendered report files are blobs keyed by
//! `raw/{job_id}/{step_order}-{i}.json` and `reports/{job_id}/report.*`.
//! Two backends implement the same seam: an HTTP object service and a local
//! filesystem root for development and tests.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::tools::{check_http_response, ToolError};
use crate::types::{AssetRef, ReportAssets};

/// The artifact store seam.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under a stable key, returning the object URL.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport or status failure. Artifact
    /// failures during publication are fatal to the job.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<String, ToolError>;

    /// Produce a time-limited access URL for an existing object.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport or status failure.
    async fn get_signed(&self, key: &str, ttl: Duration) -> Result<String, ToolError>;
}

/// HTTP object-service backend.
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactStore {
    /// Create a client for the object service.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, ToolError> {
        let url = format!("{}/objects/{key}", self.base_url);
        let response = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(url)
    }

    async fn get_signed(&self, key: &str, ttl: Duration) -> Result<String, ToolError> {
        let url = format!("{}/sign/{key}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("ttl_seconds", ttl.as_secs().to_string())])
            .send()
            .await?;
        let body = check_http_response(response).await?;
        Ok(body.trim().to_owned())
    }
}

/// Local filesystem backend rooted at a directory.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<String, ToolError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Parse(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ToolError::Parse(format!("write {}: {e}", path.display())))?;
        Ok(format!("file://{}", path.display()))
    }

    async fn get_signed(&self, key: &str, _ttl: Duration) -> Result<String, ToolError> {
        Ok(format!("file://{}", self.root.join(key).display()))
    }
}

/// Object key for a raw fetched document.
pub fn raw_document_key(job_id: Uuid, step_order: u32, index: usize) -> String {
    format!("raw/{job_id}/{step_order}-{index}.json")
}

/// Object key for a rendered report asset.
pub fn report_key(job_id: Uuid, extension: &str) -> String {
    format!("reports/{job_id}/report.{extension}")
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Publish the finalized report through the artifact store.
///
/// The Markdown bytes are rendered here; PDF and DOCX rendering belong to
/// the downstream rendering collaborator, so their slots stay empty until it
/// fills them.
///
/// # Errors
///
/// Returns [`ToolError`] when the upload fails.
pub async fn publish_report(
    store: &dyn ArtifactStore,
    job_id: Uuid,
    report_markdown: &str,
) -> Result<ReportAssets, ToolError> {
    let bytes = report_markdown.as_bytes();
    let key = report_key(job_id, "md");
    let url = store.put(&key, bytes, "text/markdown").await?;
    info!(job_id = %job_id, key, bytes = bytes.len(), "report markdown published");

    Ok(ReportAssets {
        markdown: AssetRef {
            key,
            url,
            sha256: sha256_hex(bytes),
            bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
        },
        pdf: None,
        docx: None,
    })
}
