//! Citation ledger manager: deterministic per-job citation numbering.
//!
//! A source's identity is a SHA-1 digest over `url|title|raw_storage_url`.
//! Numbers are assigned by lookup-then-insert under the ledger's uniqueness
//! constraints; a conflict means a concurrent writer advanced the sequence,
//! and the manager retries the read-max-insert round.

use std::sync::Arc;

use sha1::{Digest, Sha1};
use tracing::warn;
use uuid::Uuid;

use crate::store::{Store, StoreError};
use crate::types::{LedgerEntry, NewLedgerEntry, Source};

/// Attempts before giving up on a contended citation number. Contention is
/// bounded by the number of concurrent writers per job, which the claim
/// discipline keeps small.
const MAX_ASSIGN_ATTEMPTS: u32 = 16;

/// A source's citation identity, independent of which note carries it.
#[derive(Debug, Clone)]
pub struct CitationSource {
    /// Source URL; may be empty.
    pub url: String,
    /// Source title; may be empty.
    pub title: String,
    /// Raw artifact pointer; may be empty.
    pub raw_storage_url: String,
}

impl CitationSource {
    /// The report-level identity of a stored source.
    ///
    /// The raw artifact pointer is step-scoped (`raw/{job}/{step}-{i}`), so
    /// carrying it into the hash would split a page re-fetched by a second
    /// step into a second citation. Report citations key on what the reader
    /// sees: the URL and title.
    pub fn from_source(source: &Source) -> Self {
        Self {
            url: source.url.clone(),
            title: source.title.clone(),
            raw_storage_url: String::new(),
        }
    }
}

/// Stable digest identifying a source within a job's ledger.
pub fn source_hash(source: &CitationSource) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.url.as_bytes());
    hasher.update(b"|");
    hasher.update(source.title.as_bytes());
    hasher.update(b"|");
    hasher.update(source.raw_storage_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Assigns citation numbers against the durable ledger.
pub struct LedgerManager {
    store: Arc<dyn Store>,
}

impl LedgerManager {
    /// Create a manager over the shared store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Return the citation number for a source, inserting a new ledger entry
    /// with `max + 1` when the source is unseen.
    ///
    /// Idempotent: the same source always maps to the same number within a
    /// job, including across worker restarts and concurrent writers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure or when the ledger stays
    /// contended beyond the retry bound.
    pub async fn assign_citation(
        &self,
        job_id: Uuid,
        source: &CitationSource,
    ) -> Result<u32, StoreError> {
        let hash = source_hash(source);

        for attempt in 1..=MAX_ASSIGN_ATTEMPTS {
            if let Some(entry) = self.store.find_citation(job_id, &hash).await? {
                return Ok(entry.citation_number);
            }

            let next = self
                .store
                .max_citation_number(job_id)
                .await?
                .saturating_add(1);
            match self
                .store
                .insert_citation(NewLedgerEntry {
                    job_id,
                    source_hash: hash.clone(),
                    citation_number: next,
                    title: source.title.clone(),
                    url: source.url.clone(),
                })
                .await
            {
                Ok(entry) => return Ok(entry.citation_number),
                Err(StoreError::CitationConflict { .. }) => {
                    // Another writer took the number or inserted the same
                    // hash; loop back to the lookup.
                    warn!(job_id = %job_id, attempt, "citation insert conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::CitationConflict {
            job_id,
            citation_number: 0,
        })
    }

    /// The job's ledger, ordered by citation number; when empty, a transient
    /// ledger derived from the job's sources in creation order.
    ///
    /// The transient entries are not persisted: classic-mode reports that
    /// produced no inline citations still get a references section.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    pub async fn ledger_or_fallback(&self, job_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let ledger = self.store.list_citations(job_id).await?;
        if !ledger.is_empty() {
            return Ok(ledger);
        }

        let sources = self.store.list_sources_for_job(job_id).await?;
        let mut entries = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for source in &sources {
            let citation = CitationSource::from_source(source);
            let hash = source_hash(&citation);
            if !seen.insert(hash.clone()) {
                continue;
            }
            let number = u32::try_from(entries.len().saturating_add(1)).unwrap_or(u32::MAX);
            entries.push(LedgerEntry {
                id: source.id,
                job_id,
                source_hash: hash,
                citation_number: number,
                title: source.title.clone(),
                url: source.url.clone(),
                accessed_at: source.created_at,
            });
        }
        Ok(entries)
    }
}
