// crates/vlt-server/src/retrievers/threads.rs
// Thread-memory retriever over embedded reasoning nodes

use super::Retriever;
use crate::db::{self, DatabasePool};
use crate::error::{Result, VltError};
use crate::llm::LlmClient;
use crate::summarizer::ThreadSummaryManager;
use crate::utils::estimate_tokens;
use crate::vector::{bytes_to_embedding, cosine_similarity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use vlt_types::{RetrievalMethod, RetrievalResult, SourceType};

/// Retriever over the project's thread nodes. Available only when the
/// project actually has threads. A successful search also refreshes the
/// lazy summary of each matched thread, best-effort.
pub struct ThreadRetriever {
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
    project_id: String,
    summarizer: Option<Arc<ThreadSummaryManager>>,
}

impl ThreadRetriever {
    pub fn new(
        pool: Arc<DatabasePool>,
        llm: Arc<LlmClient>,
        project_id: impl Into<String>,
        summarizer: Option<Arc<ThreadSummaryManager>>,
    ) -> Self {
        Self {
            pool,
            llm,
            project_id: project_id.into(),
            summarizer,
        }
    }
}

#[async_trait]
impl Retriever for ThreadRetriever {
    fn name(&self) -> &'static str {
        "threads"
    }

    async fn available(&self) -> bool {
        let project_id = self.project_id.clone();
        match self
            .pool
            .run(move |conn| db::list_threads_sync(conn, &project_id))
            .await
        {
            Ok(threads) => !threads.is_empty(),
            Err(e) => {
                tracing::warn!("Error checking thread availability: {}", e);
                false
            }
        }
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .llm
            .embed(query)
            .await
            .map_err(|e| VltError::retriever(self.name(), e.to_string()))?;

        let project_id = self.project_id.clone();
        let candidates = self
            .pool
            .run(move |conn| db::node_embedding_candidates_sync(conn, &project_id))
            .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(i, node)| {
                let blob = node.embedding.as_ref()?;
                if blob.is_empty() {
                    return None;
                }
                let vec = bytes_to_embedding(blob);
                Some((i, cosine_similarity(&query_embedding, &vec).clamp(0.0, 1.0)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let mut matched_threads: Vec<String> = Vec::new();
        let results: Vec<RetrievalResult> = scored
            .into_iter()
            .map(|(i, score)| {
                let node = &candidates[i];
                if !matched_threads.contains(&node.thread_id) {
                    matched_threads.push(node.thread_id.clone());
                }

                let content = format!(
                    "[Thread: {}, Node: {}]\n{}",
                    node.thread_id, node.sequence_id, node.content
                );

                let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
                metadata.insert("thread_id".to_string(), node.thread_id.clone().into());
                metadata.insert("node_id".to_string(), node.sequence_id.into());
                metadata.insert("author".to_string(), node.author.clone().into());
                metadata.insert("timestamp".to_string(), node.timestamp.to_rfc3339().into());
                metadata.insert("project_id".to_string(), self.project_id.clone().into());

                RetrievalResult {
                    token_count: estimate_tokens(&content),
                    content,
                    source_type: SourceType::Thread,
                    source_path: format!("thread:{}#{}", node.thread_id, node.sequence_id),
                    retrieval_method: RetrievalMethod::Vector,
                    score,
                    metadata,
                }
            })
            .collect();

        // Keep summaries warm for threads the Oracle is about to cite.
        // Failures here must not fail the search.
        if let Some(summarizer) = &self.summarizer {
            for thread_id in matched_threads {
                if let Err(e) = summarizer.generate_summary(&thread_id, false).await {
                    tracing::warn!(thread = %thread_id, "summary refresh failed: {}", e);
                }
            }
        }

        tracing::info!(count = results.len(), "Thread search complete");
        Ok(results)
    }
}
