//! Vector store client for cross-job warm context.
//!
//! Notes are indexed as they are written; the planner consults the index for
//! "warm" notes from prior jobs. The index is strictly best-effort: an
//! unavailable backend degrades planner quality but never fails a job, so
//! callers log and continue on error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::tools::{check_http_response, ToolError};

/// Payload stored alongside each indexed note vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotePayload {
    /// Owning job.
    pub job_id: Uuid,
    /// The note's synthesis role string.
    pub role: String,
    /// Importance in 1..=5.
    pub importance: u8,
    /// The note content, returned verbatim for retrieval-as-context.
    pub content: String,
}

/// A nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct WarmHit {
    /// Similarity score, higher is closer.
    pub score: f32,
    /// The stored payload.
    pub payload: NotePayload,
}

/// Filter for warm-note searches.
#[derive(Debug, Clone, Default)]
pub struct WarmFilter {
    /// Exclude notes belonging to this job (a job should not warm-start
    /// from its own archive).
    pub exclude_job: Option<Uuid>,
    /// Minimum importance to consider.
    pub min_importance: Option<u8>,
}

/// The vector store seam.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport or status failure.
    async fn ensure_collection(&self, dim: usize) -> Result<(), ToolError>;

    /// Insert or replace one note vector.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport or status failure.
    async fn upsert(
        &self,
        id: Uuid,
        vector: &[f32],
        payload: &NotePayload,
    ) -> Result<(), ToolError>;

    /// Nearest-neighbor search.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport, status, or parse failure.
    async fn search(
        &self,
        vector: &[f32],
        limit: u32,
        filter: &WarmFilter,
    ) -> Result<Vec<WarmHit>, ToolError>;
}

/// HTTP client for a Qdrant-style points API.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl HttpVectorIndex {
    /// Create a client for one collection.
    pub fn new(base_url: &str, collection: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            collection: collection.to_owned(),
        }
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn ensure_collection(&self, dim: usize) -> Result<(), ToolError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let response = self
            .client
            .put(&url)
            .json(&json!({ "vectors": { "size": dim, "distance": "Cosine" } }))
            .send()
            .await?;
        // An already-existing collection answers with a conflict; both
        // outcomes leave the collection usable.
        if response.status().as_u16() == 409 {
            return Ok(());
        }
        check_http_response(response).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        id: Uuid,
        vector: &[f32],
        payload: &NotePayload,
    ) -> Result<(), ToolError> {
        let url = format!(
            "{}/collections/{}/points",
            self.base_url, self.collection
        );
        let response = self
            .client
            .put(&url)
            .json(&json!({
                "points": [{ "id": id, "vector": vector, "payload": payload }]
            }))
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: u32,
        filter: &WarmFilter,
    ) -> Result<Vec<WarmHit>, ToolError> {
        let mut must_not = Vec::new();
        if let Some(job_id) = filter.exclude_job {
            must_not.push(json!({ "key": "job_id", "match": { "value": job_id } }));
        }
        let mut must = Vec::new();
        if let Some(min) = filter.min_importance {
            must.push(json!({ "key": "importance", "range": { "gte": min } }));
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
                "filter": { "must": must, "must_not": must_not },
            }))
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| ToolError::Parse(e.to_string()))?;
        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                let payload = hit.payload?;
                Some(WarmHit {
                    score: hit.score,
                    payload,
                })
            })
            .collect())
    }
}

/// Disabled vector index: every operation succeeds and finds nothing.
///
/// Used when no vector backend is configured, and as the neutral element in
/// tests that do not exercise warm context.
#[derive(Debug, Default)]
pub struct NullVectorIndex;

#[async_trait]
impl VectorIndex for NullVectorIndex {
    async fn ensure_collection(&self, _dim: usize) -> Result<(), ToolError> {
        Ok(())
    }

    async fn upsert(
        &self,
        _id: Uuid,
        _vector: &[f32],
        _payload: &NotePayload,
    ) -> Result<(), ToolError> {
        Ok(())
    }

    async fn search(
        &self,
        _vector: &[f32],
        _limit: u32,
        _filter: &WarmFilter,
    ) -> Result<Vec<WarmHit>, ToolError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response body of the points search endpoint.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

/// One scored point.
#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<NotePayload>,
}
