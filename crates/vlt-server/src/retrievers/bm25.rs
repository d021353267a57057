// crates/vlt-server/src/retrievers/bm25.rs
// FTS5-backed lexical retriever

use super::{Retriever, chunk_metadata, format_chunk_content};
use crate::db::{self, DatabasePool};
use crate::error::{Result, VltError};
use crate::utils::estimate_tokens;
use async_trait::async_trait;
use std::sync::Arc;
use vlt_types::{RetrievalMethod, RetrievalResult, SourceType};

/// Keyword retriever over `code_chunk_fts`. Always available: the FTS index
/// is maintained transactionally alongside the chunk table.
pub struct Bm25Retriever {
    pool: Arc<DatabasePool>,
    project_id: String,
}

impl Bm25Retriever {
    pub fn new(pool: Arc<DatabasePool>, project_id: impl Into<String>) -> Self {
        Self {
            pool,
            project_id: project_id.into(),
        }
    }
}

/// Strip a term down to FTS5-safe characters.
fn escape_fts_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Build an FTS5 MATCH expression from free-form input.
///
/// A single term becomes a prefix match; multiple terms are OR-joined with
/// a prefix match on the last. Terms that vanish after escaping are dropped.
fn build_fts_query(query: &str) -> String {
    let terms: Vec<&str> = query.split_whitespace().filter(|t| !t.is_empty()).collect();
    if terms.is_empty() {
        return String::new();
    }

    if terms.len() == 1 {
        let cleaned = escape_fts_term(terms[0]);
        if cleaned.is_empty() {
            return String::new();
        }
        return format!("{cleaned}*");
    }

    let mut parts: Vec<String> = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        let cleaned = escape_fts_term(term);
        if cleaned.is_empty() {
            continue;
        }
        if i == terms.len() - 1 {
            parts.push(format!("{cleaned}*"));
        } else {
            parts.push(cleaned);
        }
    }
    parts.join(" OR ")
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn name(&self) -> &'static str {
        "bm25"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let project_id = self.project_id.clone();
        let hits = self
            .pool
            .run(move |conn| db::fts_search_sync(conn, &fts_query, &project_id, limit))
            .await
            .map_err(|e| VltError::retriever(self.name(), e.to_string()))?;

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // FTS5 ranks are negative (lower is better); negate and normalise
        // by the maximum so the best hit scores 1.0.
        let raw: Vec<(String, f64)> = hits.iter().map(|h| (h.chunk_id.clone(), -h.rank)).collect();
        let max_score = raw.iter().map(|(_, s)| *s).fold(0.0f64, f64::max);

        let mut results = Vec::with_capacity(raw.len());
        for (chunk_id, raw_score) in raw {
            let id = chunk_id.clone();
            let chunk = self
                .pool
                .run(move |conn| db::chunk_by_id_sync(conn, &id))
                .await?;
            let Some(chunk) = chunk else {
                tracing::warn!(chunk_id = %chunk_id, "FTS hit without a chunk row");
                continue;
            };

            let score = if max_score > 0.0 {
                (raw_score / max_score).clamp(0.0, 1.0) as f32
            } else {
                0.0
            };

            let content = format_chunk_content(&chunk);
            let token_count = chunk.token_count.unwrap_or_else(|| estimate_tokens(&content));
            results.push(RetrievalResult {
                content,
                source_type: SourceType::Code,
                source_path: format!("{}:{}", chunk.file_path, chunk.start_line),
                retrieval_method: RetrievalMethod::Bm25,
                score,
                token_count,
                metadata: chunk_metadata(&chunk),
            });
        }

        tracing::info!(count = results.len(), "BM25 search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_fts_term() {
        assert_eq!(escape_fts_term("hello"), "hello");
        assert_eq!(escape_fts_term("test_name"), "test_name");
        assert_eq!(escape_fts_term("fn()"), "fn");
        assert_eq!(escape_fts_term("\"quoted\""), "quoted");
        assert_eq!(escape_fts_term("*-()^\""), "");
    }

    #[test]
    fn test_build_fts_query_single_term() {
        assert_eq!(build_fts_query("search"), "search*");
        assert_eq!(build_fts_query("*test*"), "test*");
        assert_eq!(build_fts_query(""), "");
        assert_eq!(build_fts_query("() * -"), "");
    }

    #[test]
    fn test_build_fts_query_multiple_terms() {
        assert_eq!(build_fts_query("search code"), "search OR code*");
        assert_eq!(build_fts_query("find user data"), "find OR user OR data*");
        assert_eq!(build_fts_query("fn() main()"), "fn OR main*");
    }
}
