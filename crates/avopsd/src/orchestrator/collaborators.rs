//! Storage seams used by the engine.
//!
//! The engine talks to telemetry, the knowledge index and the run log only
//! through these traits, so tests can swap in failing or counting fakes.

use anyhow::Result;
use async_trait::async_trait;
use avops_common::{
    CopilotDb, CopilotRun, KnowledgeIndex, NewCopilotRun, RetrievalHit, TelemetrySample,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Latest-sample lookup
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn latest_for_device(&self, device_id: &str) -> Result<Option<TelemetrySample>>;
}

/// Full-text search over the knowledge base
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// `fts_query` is already in FTS5 syntax
    async fn search(&self, fts_query: &str, limit: usize) -> Result<Vec<RetrievalHit>>;
}

/// Append-only run log
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn append_run(&self, run: NewCopilotRun) -> Result<CopilotRun>;
}

#[async_trait]
impl TelemetrySource for CopilotDb {
    async fn latest_for_device(&self, device_id: &str) -> Result<Option<TelemetrySample>> {
        self.latest_telemetry(device_id).await
    }
}

#[async_trait]
impl RunSink for CopilotDb {
    async fn append_run(&self, run: NewCopilotRun) -> Result<CopilotRun> {
        CopilotDb::append_run(self, run).await
    }
}

#[async_trait]
impl KnowledgeSource for KnowledgeIndex {
    async fn search(&self, fts_query: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
        KnowledgeIndex::search(self, fts_query, limit).await
    }
}

// ============================================================================
// Fake Knowledge Source (Testing)
// ============================================================================

/// Canned knowledge source that counts calls
pub struct FakeKnowledgeSource {
    hits: Vec<RetrievalHit>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeKnowledgeSource {
    pub fn empty() -> Self {
        Self::with_hits(Vec::new())
    }

    pub fn with_hits(hits: Vec<RetrievalHit>) -> Self {
        Self {
            hits,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every search errors, like a missing FTS table
    pub fn failing() -> Self {
        Self {
            hits: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeSource for FakeKnowledgeSource {
    async fn search(&self, _fts_query: &str, limit: usize) -> Result<Vec<RetrievalHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("no such table: kb_docs_fts");
        }
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}
