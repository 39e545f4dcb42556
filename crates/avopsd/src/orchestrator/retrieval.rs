//! Best-effort knowledge retrieval.
//!
//! Retrieval never fails a run: an empty query skips the index entirely and
//! any index error is logged and treated as "no hits".

use avops_common::{to_fts_query, RetrievalHit};
use tracing::{debug, warn};

use super::collaborators::KnowledgeSource;

/// Top `top_k` hits for free text, or nothing
pub async fn retrieve(source: &dyn KnowledgeSource, text: &str, top_k: usize) -> Vec<RetrievalHit> {
    let fts_query = to_fts_query(text);
    if fts_query.is_empty() || top_k == 0 {
        debug!("Skipping retrieval, no searchable terms");
        return Vec::new();
    }

    match source.search(&fts_query, top_k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!("Knowledge retrieval failed, continuing without snippets: {:#}", e);
            Vec::new()
        }
    }
}
