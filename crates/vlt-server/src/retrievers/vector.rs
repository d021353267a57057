// crates/vlt-server/src/retrievers/vector.rs
// Dense-vector retriever over chunk embeddings

use super::{Retriever, chunk_metadata, format_chunk_content};
use crate::db::{self, DatabasePool};
use crate::error::{Result, VltError};
use crate::llm::LlmClient;
use crate::utils::estimate_tokens;
use crate::vector::{bytes_to_embedding, cosine_similarity};
use async_trait::async_trait;
use std::sync::Arc;
use vlt_types::{RetrievalMethod, RetrievalResult, SourceType};

/// Retriever that embeds the query and cosine-scans every embedded chunk in
/// the project. Unavailable without an API key.
pub struct VectorRetriever {
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
    project_id: String,
}

impl VectorRetriever {
    pub fn new(pool: Arc<DatabasePool>, llm: Arc<LlmClient>, project_id: impl Into<String>) -> Self {
        Self {
            pool,
            llm,
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn available(&self) -> bool {
        self.llm.has_api_key()
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        let query_embedding = self
            .llm
            .embed(query)
            .await
            .map_err(|e| VltError::retriever(self.name(), e.to_string()))?;

        let norm: f32 = query_embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(VltError::retriever(self.name(), "query embedding has zero magnitude"));
        }
        let query_vec: Vec<f32> = query_embedding.iter().map(|v| v / norm).collect();

        let project_id = self.project_id.clone();
        let chunks = self
            .pool
            .run(move |conn| db::chunks_with_embeddings_sync(conn, &project_id))
            .await?;

        if chunks.is_empty() {
            tracing::info!(project = %self.project_id, "No chunks with embeddings found");
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let blob = chunk.embedding.as_ref()?;
                let vec = bytes_to_embedding(blob);
                let similarity = cosine_similarity(&query_vec, &vec);
                Some((i, similarity.clamp(0.0, 1.0)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let results = scored
            .into_iter()
            .map(|(i, score)| {
                let chunk = &chunks[i];
                let content = format_chunk_content(chunk);
                let token_count = chunk.token_count.unwrap_or_else(|| estimate_tokens(&content));
                RetrievalResult {
                    content,
                    source_type: SourceType::Code,
                    source_path: format!("{}:{}", chunk.file_path, chunk.start_line),
                    retrieval_method: RetrievalMethod::Vector,
                    score,
                    token_count,
                    metadata: chunk_metadata(chunk),
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(count = results.len(), "Vector search complete");
        Ok(results)
    }
}
