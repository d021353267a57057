// crates/vlt-server/src/summarizer/mod.rs
// Lazy thread summarisation: generate on read, never on write
//
// Summaries are cached per thread and refreshed incrementally. Staleness is
// anchored on last_node_id: the cache is fresh iff that id is still the
// thread's greatest-sequence node.

use crate::db::{self, DatabasePool};
use crate::error::Result;
use crate::llm::SummaryModel;
use chrono::Utc;
use rusqlite::Connection;
use std::sync::Arc;
use vlt_types::{NodeRecord, ThreadSummaryCache};

/// Reply used for threads that have nothing to summarise.
pub const EMPTY_THREAD_SUMMARY: &str = "No content in this thread yet.";

/// Staleness verdict for a thread's summary cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staleness {
    pub is_stale: bool,
    /// Anchor for incremental regeneration; None forces a full pass.
    pub last_node_id: Option<String>,
    pub new_node_count: i64,
}

/// Compare the cache anchor against the thread's newest node.
///
/// - no cache row: stale, everything is new
/// - anchor node deleted: stale with no anchor (full regeneration)
/// - anchor == newest node: fresh
/// - otherwise: stale, counting nodes past the anchor
pub fn check_staleness_sync(conn: &Connection, thread_id: &str) -> rusqlite::Result<Staleness> {
    let cache = db::get_summary_cache_sync(conn, thread_id)?;

    let Some(cache) = cache else {
        let node_count = db::count_nodes_sync(conn, thread_id)?;
        return Ok(Staleness {
            is_stale: true,
            last_node_id: None,
            new_node_count: node_count,
        });
    };

    let Some(latest) = db::latest_node_sync(conn, thread_id)? else {
        // Cache but no nodes; treat as fresh and let the cached text stand
        return Ok(Staleness {
            is_stale: false,
            last_node_id: Some(cache.last_node_id),
            new_node_count: 0,
        });
    };

    if cache.last_node_id == latest.id {
        return Ok(Staleness {
            is_stale: false,
            last_node_id: Some(cache.last_node_id),
            new_node_count: 0,
        });
    }

    let Some(anchor) = db::node_by_id_sync(conn, &cache.last_node_id)? else {
        tracing::warn!(thread = thread_id, "summary anchor node missing, full regeneration");
        let node_count = db::count_nodes_sync(conn, thread_id)?;
        return Ok(Staleness {
            is_stale: true,
            last_node_id: None,
            new_node_count: node_count,
        });
    };

    let new_nodes = db::nodes_after_sequence_sync(conn, thread_id, anchor.sequence_id)?;
    Ok(Staleness {
        is_stale: true,
        last_node_id: Some(cache.last_node_id),
        new_node_count: new_nodes.len() as i64,
    })
}

fn bullets(nodes: &[NodeRecord]) -> String {
    nodes
        .iter()
        .map(|n| format!("- {}", n.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Manager for lazy summary generation against the cache.
pub struct ThreadSummaryManager {
    pool: Arc<DatabasePool>,
    model: Arc<dyn SummaryModel>,
}

impl ThreadSummaryManager {
    pub fn new(pool: Arc<DatabasePool>, model: Arc<dyn SummaryModel>) -> Self {
        Self { pool, model }
    }

    /// Get or generate the thread summary.
    ///
    /// Fresh cache short-circuits without a model call; a stale cache with
    /// an intact anchor triggers an incremental pass over the new nodes
    /// only; anything else regenerates from the full thread.
    pub async fn generate_summary(&self, thread_id: &str, force: bool) -> Result<String> {
        let tid = thread_id.to_string();
        let staleness = self
            .pool
            .run(move |conn| check_staleness_sync(conn, &tid))
            .await?;

        if !force && !staleness.is_stale {
            let tid = thread_id.to_string();
            let cache = self
                .pool
                .run(move |conn| db::get_summary_cache_sync(conn, &tid))
                .await?;
            if let Some(cache) = cache {
                tracing::debug!(thread = thread_id, "Using cached summary");
                return Ok(cache.summary);
            }
            // No cache and nothing stale means an empty thread
            return Ok(EMPTY_THREAD_SUMMARY.to_string());
        }

        if staleness.new_node_count == 0 && !force {
            tracing::warn!(thread = thread_id, "Thread has no nodes to summarize");
            return Ok(EMPTY_THREAD_SUMMARY.to_string());
        }

        match (&staleness.last_node_id, force) {
            (Some(anchor_id), false) => self.incremental_summarize(thread_id, anchor_id).await,
            _ => self.full_summarize(thread_id).await,
        }
    }

    /// Summarise only the nodes past the anchor, folding them into the
    /// cached summary.
    async fn incremental_summarize(&self, thread_id: &str, anchor_id: &str) -> Result<String> {
        let tid = thread_id.to_string();
        let aid = anchor_id.to_string();
        let (cache, new_nodes) = self
            .pool
            .run(move |conn| {
                let cache = db::get_summary_cache_sync(conn, &tid)?;
                let anchor = db::node_by_id_sync(conn, &aid)?;
                let new_nodes = match &anchor {
                    Some(node) => db::nodes_after_sequence_sync(conn, &tid, node.sequence_id)?,
                    None => Vec::new(),
                };
                Ok::<_, rusqlite::Error>((cache, new_nodes))
            })
            .await?;

        let Some(cache) = cache else {
            tracing::warn!(thread = thread_id, "Incremental pass without a cache row");
            return self.full_summarize(thread_id).await;
        };
        if new_nodes.is_empty() {
            return Ok(cache.summary);
        }

        tracing::info!(
            thread = thread_id,
            new_nodes = new_nodes.len(),
            "Incremental summarization"
        );

        let updated = self
            .model
            .generate_summary(&cache.summary, &bullets(&new_nodes))
            .await?;

        let latest = &new_nodes[new_nodes.len() - 1];
        let row = ThreadSummaryCache {
            thread_id: thread_id.to_string(),
            summary: updated.clone(),
            last_node_id: latest.id.clone(),
            node_count: cache.node_count + new_nodes.len() as i64,
            model_used: cache.model_used,
            tokens_used: cache.tokens_used,
            generated_at: Utc::now(),
        };
        self.pool
            .run(move |conn| db::upsert_summary_cache_sync(conn, &row))
            .await?;

        Ok(updated)
    }

    /// Regenerate the summary from every node in the thread.
    async fn full_summarize(&self, thread_id: &str) -> Result<String> {
        let tid = thread_id.to_string();
        let nodes = self
            .pool
            .run(move |conn| db::nodes_in_order_sync(conn, &tid))
            .await?;

        if nodes.is_empty() {
            return Ok(EMPTY_THREAD_SUMMARY.to_string());
        }

        tracing::info!(thread = thread_id, nodes = nodes.len(), "Full summarization");

        let summary = self.model.generate_summary("", &bullets(&nodes)).await?;

        let latest = &nodes[nodes.len() - 1];
        let row = ThreadSummaryCache {
            thread_id: thread_id.to_string(),
            summary: summary.clone(),
            last_node_id: latest.id.clone(),
            node_count: nodes.len() as i64,
            model_used: self.model.model_name(),
            tokens_used: 0,
            generated_at: Utc::now(),
        };
        self.pool
            .run(move |conn| db::upsert_summary_cache_sync(conn, &row))
            .await?;

        Ok(summary)
    }

    /// Drop the cache row, forcing the next read to regenerate.
    pub async fn invalidate(&self, thread_id: &str) -> Result<bool> {
        let tid = thread_id.to_string();
        self.pool
            .run(move |conn| db::delete_summary_cache_sync(conn, &tid))
            .await
    }
}
