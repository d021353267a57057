// crates/vlt-server/src/oracle/reranker.rs
// LLM reranking of merged retrieval candidates
//
// The reranker never fails the pipeline: missing key, small candidate
// lists, transport errors and unparseable replies all fall back to a plain
// score sort.

use crate::error::{Result, VltError};
use crate::llm::LlmClient;
use crate::utils::truncate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use vlt_types::RetrievalResult;

/// HTTP timeout for the scoring call
const RERANK_TIMEOUT_SECS: u64 = 30;

/// Content preview length per candidate in the scoring prompt
const PREVIEW_CHARS: usize = 300;

/// Rerank candidates with the cheap scoring model, returning top-k.
///
/// LLM scores (0..10) replace the retriever scores entirely.
pub async fn rerank(
    query: &str,
    mut candidates: Vec<RetrievalResult>,
    top_k: usize,
    llm: &LlmClient,
) -> Vec<RetrievalResult> {
    if candidates.is_empty() {
        return candidates;
    }

    if !llm.has_api_key() {
        tracing::info!("No API key - falling back to score-based ranking");
        return fallback_rerank(candidates, top_k);
    }

    if candidates.len() <= top_k {
        tracing::debug!(
            candidates = candidates.len(),
            top_k,
            "Candidate list small, skipping rerank"
        );
        return fallback_rerank(candidates, top_k);
    }

    let prompt = build_rerank_prompt(query, &candidates);

    let scores = match call_for_scores(llm, &prompt).await {
        Ok(text) => match parse_scores(&text, candidates.len()) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!("Reranking parse failed: {}, using merged order", e);
                return fallback_rerank(candidates, top_k);
            }
        },
        Err(e) => {
            tracing::warn!("Reranking failed: {}, using merged order", e);
            return fallback_rerank(candidates, top_k);
        }
    };

    for (candidate, score) in candidates.iter_mut().zip(scores.iter()) {
        candidate.score = (score / 10.0) as f32;
    }

    fallback_rerank(candidates, top_k)
}

/// Sort by score descending and truncate — also the non-LLM fallback path.
fn fallback_rerank(mut candidates: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_k);
    candidates
}

/// Build the single scoring prompt enumerating every candidate.
fn build_rerank_prompt(query: &str, candidates: &[RetrievalResult]) -> String {
    let mut snippets = String::new();
    for (i, candidate) in candidates.iter().enumerate() {
        snippets.push_str(&format!(
            "\n{i}. Source: {}\n   Type: {}\n   Content:\n   {}\n",
            candidate.source_path,
            candidate.source_type.as_str(),
            truncate(&candidate.content, PREVIEW_CHARS),
        ));
    }

    format!(
        "You are a code search relevance evaluator. Given a user query and code snippets, \
         score each snippet's relevance.\n\n\
         Query: {query}\n\n\
         Snippets:\n{snippets}\n\
         Instructions:\n\
         1. For each snippet, assign a relevance score from 0-10:\n\
            - 10: Directly answers the query\n\
            - 7-9: Highly relevant, contains key information\n\
            - 4-6: Somewhat relevant, provides context\n\
            - 1-3: Tangentially related\n\
            - 0: Not relevant\n\n\
         2. Return ONLY a JSON array of scores in order (no explanation):\n\
         [score0, score1, score2, ...]\n\n\
         Example response: [8, 3, 9, 5, 7]\n"
    )
}

async fn call_for_scores(llm: &LlmClient, prompt: &str) -> Result<String> {
    let outcome = llm
        .chat(
            llm.rerank_model(),
            prompt,
            0.0,
            500,
            Duration::from_secs(RERANK_TIMEOUT_SECS),
        )
        .await
        .map_err(|e| VltError::Reranker(e.to_string()))?;
    Ok(outcome.content)
}

static SCORE_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\d\s,.]+\]").unwrap_or_else(|_| Regex::new(r"\[.*\]").unwrap()));

/// Parse the first `[...]` substring as a score array, clamping each value
/// to [0, 10] and padding/truncating to the candidate count.
fn parse_scores(response: &str, expected: usize) -> Result<Vec<f64>> {
    let matched = SCORE_ARRAY_RE
        .find(response)
        .ok_or_else(|| VltError::Reranker(format!("no JSON array in response: {}", truncate(response, 100))))?;

    let parsed: Vec<serde_json::Value> = serde_json::from_str(matched.as_str())
        .map_err(|e| VltError::Reranker(format!("failed to parse score array: {e}")))?;

    let mut scores: Vec<f64> = parsed
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0).clamp(0.0, 10.0))
        .collect();

    scores.resize(expected, 0.0);
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::collections::HashMap;
    use vlt_types::{RetrievalMethod, SourceType};

    fn candidate(path: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            content: format!("snippet {path}"),
            source_type: SourceType::Code,
            source_path: path.to_string(),
            retrieval_method: RetrievalMethod::Vector,
            score,
            token_count: 5,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_parse_scores_clamps_and_pads() {
        let scores = parse_scores("Here you go: [8, 3, 15, -2]", 6).unwrap();
        assert_eq!(scores, vec![8.0, 3.0, 10.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parse_scores_truncates_extra() {
        let scores = parse_scores("[1, 2, 3, 4, 5]", 3).unwrap();
        assert_eq!(scores, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_parse_scores_rejects_garbage() {
        assert!(parse_scores("no array here", 3).is_err());
    }

    #[tokio::test]
    async fn test_no_key_falls_back_to_score_sort() {
        let llm = LlmClient::new(Settings::default());
        let candidates = vec![
            candidate("low.py:1", 0.2),
            candidate("high.py:1", 0.9),
            candidate("mid.py:1", 0.5),
        ];

        let reranked = rerank("query", candidates, 2, &llm).await;
        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].source_path, "high.py:1");
        assert_eq!(reranked[1].source_path, "mid.py:1");
    }

    #[test]
    fn test_rerank_prompt_enumerates_candidates() {
        let prompt = build_rerank_prompt("find auth", &[candidate("a.py:1", 0.5), candidate("b.py:2", 0.4)]);
        assert!(prompt.contains("0. Source: a.py:1"));
        assert!(prompt.contains("1. Source: b.py:2"));
        assert!(prompt.contains("JSON array of scores"));
    }
}
