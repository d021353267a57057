// crates/vlt-server/src/retrievers/mod.rs
// Retriever contract and hybrid orchestration
//
// Every source implements the same small capability set; the hybrid
// orchestrator fans out concurrently, merges by score, dedupes by source
// path and optionally hands the merged list to the LLM reranker. One
// retriever failing must never take down the others, so the fan-out always
// goes through retrieve_safe.

mod bm25;
mod graph;
mod threads;
mod vault;
mod vector;

pub use bm25::Bm25Retriever;
pub use graph::GraphRetriever;
pub use threads::ThreadRetriever;
pub use vault::VaultRetriever;
pub use vector::VectorRetriever;

use crate::error::Result;
use crate::oracle::reranker::rerank;
use crate::llm::LlmClient;
use async_trait::async_trait;
use std::sync::Arc;
use vlt_types::{CodeChunk, RetrievalResult};

/// Capability set shared by all retrievers.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this retriever can answer right now (key present, index
    /// populated, endpoint configured).
    async fn available(&self) -> bool;

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>>;

    /// Like retrieve, but failures degrade to an empty list after logging.
    async fn retrieve_safe(&self, query: &str, limit: usize) -> Vec<RetrievalResult> {
        match self.retrieve(query, limit).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(retriever = self.name(), "retrieval failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Merge per-retriever result lists: sort by score descending (stable, ties
/// broken by source path) and keep the first occurrence of each source path.
pub fn merge_results(results_by_retriever: Vec<Vec<RetrievalResult>>) -> Vec<RetrievalResult> {
    let mut all: Vec<RetrievalResult> = results_by_retriever.into_iter().flatten().collect();

    all.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_path.cmp(&b.source_path))
    });

    let mut seen = std::collections::HashSet::new();
    all.retain(|r| seen.insert(r.source_path.clone()));
    all
}

/// Run hybrid retrieval across the given retrievers.
///
/// Each available retriever is queried concurrently with `limit = 2 * top_k`
/// to give the merger headroom. When reranking is enabled and a key is
/// configured, the merged list goes through the LLM reranker; otherwise it
/// is truncated to `top_k` by score.
pub async fn hybrid_retrieve(
    query: &str,
    retrievers: &[Arc<dyn Retriever>],
    top_k: usize,
    use_rerank: bool,
    llm: &LlmClient,
) -> Vec<RetrievalResult> {
    let mut available = Vec::new();
    for retriever in retrievers {
        if retriever.available().await {
            available.push(retriever.clone());
        } else {
            tracing::debug!(retriever = retriever.name(), "skipping unavailable retriever");
        }
    }

    if available.is_empty() {
        tracing::warn!("No retrievers available for hybrid retrieval");
        return Vec::new();
    }

    tracing::info!(
        count = available.len(),
        names = ?available.iter().map(|r| r.name()).collect::<Vec<_>>(),
        "Running hybrid retrieval"
    );

    let fetch_limit = top_k * 2;
    let tasks = available
        .iter()
        .map(|r| r.retrieve_safe(query, fetch_limit));
    let results_by_retriever = futures::future::join_all(tasks).await;

    for (retriever, results) in available.iter().zip(results_by_retriever.iter()) {
        tracing::debug!(retriever = retriever.name(), count = results.len(), "retriever done");
    }

    let merged = merge_results(results_by_retriever);
    tracing::info!(count = merged.len(), "Merged unique results");

    if use_rerank && llm.has_api_key() {
        rerank(query, merged, top_k, llm).await
    } else {
        merged.into_iter().take(top_k).collect()
    }
}

/// Compose the rendered content of a chunk result: signature, docstring,
/// imports, class context and body, each under a markdown subheading.
pub(crate) fn format_chunk_content(chunk: &CodeChunk) -> String {
    let mut parts = Vec::new();
    if let Some(sig) = &chunk.signature {
        parts.push(format!("# Signature\n{sig}"));
    }
    if let Some(doc) = &chunk.docstring {
        parts.push(format!("# Documentation\n{doc}"));
    }
    if let Some(imports) = &chunk.imports {
        parts.push(format!("# Imports\n{imports}"));
    }
    if let Some(ctx) = &chunk.class_context {
        parts.push(format!("# Class Context\n{ctx}"));
    }
    parts.push(format!("# Code\n{}", chunk.body));
    parts.join("\n\n")
}

/// Shared metadata bag for chunk-backed results.
pub(crate) fn chunk_metadata(
    chunk: &CodeChunk,
) -> std::collections::HashMap<String, serde_json::Value> {
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("file_path".to_string(), chunk.file_path.clone().into());
    metadata.insert("chunk_kind".to_string(), chunk.chunk_kind.as_str().into());
    metadata.insert("qualified_name".to_string(), chunk.qualified_name.clone().into());
    metadata.insert("start_line".to_string(), chunk.start_line.into());
    metadata.insert("end_line".to_string(), chunk.end_line.into());
    metadata.insert("language".to_string(), chunk.language.clone().into());
    if let Some(sig) = &chunk.signature {
        metadata.insert("signature".to_string(), sig.clone().into());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use vlt_types::{RetrievalMethod, SourceType};

    pub(crate) fn result(path: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            content: format!("content for {path}"),
            source_type: SourceType::Code,
            source_path: path.to_string(),
            retrieval_method: RetrievalMethod::Vector,
            score,
            token_count: 10,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_merge_sorts_by_score_desc() {
        let merged = merge_results(vec![
            vec![result("a.py:1", 0.9)],
            vec![result("b.py:1", 1.0)],
        ]);
        assert_eq!(merged[0].source_path, "b.py:1");
        assert_eq!(merged[1].source_path, "a.py:1");
    }

    #[test]
    fn test_merge_dedupes_first_occurrence_wins() {
        let merged = merge_results(vec![
            vec![result("a.py:1", 0.9)],
            vec![result("a.py:1", 0.4)],
            vec![result("c.py:1", 0.5)],
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_path, "a.py:1");
        assert!((merged[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_merge_ties_break_by_source_path() {
        let merged = merge_results(vec![vec![
            result("z.py:1", 0.5),
            result("a.py:1", 0.5),
        ]]);
        assert_eq!(merged[0].source_path, "a.py:1");
        assert_eq!(merged[1].source_path, "z.py:1");
    }

    #[test]
    fn test_format_chunk_content_sections() {
        let chunk = CodeChunk {
            id: "c".to_string(),
            project_id: "p".to_string(),
            file_path: "src/a.py".to_string(),
            file_hash: String::new(),
            chunk_kind: vlt_types::ChunkKind::Method,
            name: "get_user".to_string(),
            qualified_name: "svc.User.get_user".to_string(),
            language: "python".to_string(),
            start_line: 5,
            end_line: 9,
            imports: Some("from db import query".to_string()),
            class_context: Some("class User:".to_string()),
            signature: Some("def get_user(self, id)".to_string()),
            decorators: None,
            docstring: Some("Fetch one user.".to_string()),
            body: "return query(id)".to_string(),
            embedding: None,
            token_count: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let content = format_chunk_content(&chunk);
        assert!(content.contains("# Signature\ndef get_user(self, id)"));
        assert!(content.contains("# Documentation\nFetch one user."));
        assert!(content.contains("# Imports\nfrom db import query"));
        assert!(content.contains("# Class Context\nclass User:"));
        assert!(content.ends_with("# Code\nreturn query(id)"));
    }
}
