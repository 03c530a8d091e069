//! Fathom: a durable, crash-tolerant orchestrator for long-running
//! deep-research jobs.
//!
//! A job enters as a question plus metadata, is planned into investigative
//! steps, executed against search/fetch tools with language-model
//! summarization, and synthesized into a cited report with published
//! artifacts. All progress lives in the durable store, so workers can die
//! and be replaced mid-job.

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod store;
pub mod tokens;
pub mod tools;
pub mod types;
pub mod vector;
