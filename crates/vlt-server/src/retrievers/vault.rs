// crates/vlt-server/src/retrievers/vault.rs
// Vault-notes retriever over the document service's search API

use super::Retriever;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use vlt_types::{RetrievalMethod, RetrievalResult, SourceType};

/// HTTP timeout for vault searches
const VAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct VaultSearchResponse {
    #[serde(default)]
    results: Vec<VaultItem>,
}

#[derive(Debug, Deserialize)]
struct VaultItem {
    #[serde(default = "VaultItem::default_path")]
    path: String,
    title: Option<String>,
    #[serde(default)]
    snippet: String,
    score: Option<f32>,
    #[serde(default)]
    updated: String,
}

impl VaultItem {
    fn default_path() -> String {
        "unknown.md".to_string()
    }
}

/// Retriever over `GET {vault_url}/api/search`. Network failures, timeouts
/// and 404s all degrade to an empty result — the vault being down must
/// never fail a query.
pub struct VaultRetriever {
    vault_url: String,
    http: reqwest::Client,
}

impl VaultRetriever {
    pub fn new(vault_url: impl Into<String>) -> Self {
        Self {
            vault_url: vault_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Retriever for VaultRetriever {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn available(&self) -> bool {
        // URL configured is enough; pinging the health endpoint on every
        // query would add latency to the whole fan-out.
        !self.vault_url.is_empty()
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let response = match self
            .http
            .get(format!("{}/api/search", self.vault_url))
            .query(&[("q", query), ("limit", &limit.to_string())])
            .timeout(Duration::from_secs(VAULT_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    tracing::error!("Vault search timed out after {}s", VAULT_TIMEOUT_SECS);
                } else {
                    tracing::error!("Network error calling vault API: {}", e);
                }
                return Ok(Vec::new());
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!("Vault search endpoint not found (404). Is the vault service running?");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            tracing::error!("Vault search failed with status {}", response.status());
            return Ok(Vec::new());
        }

        let data: VaultSearchResponse = match response.json().await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Invalid vault search response: {}", e);
                return Ok(Vec::new());
            }
        };

        tracing::info!(count = data.results.len(), "Vault search returned results");

        let results = data
            .results
            .into_iter()
            .take(limit)
            .map(|item| {
                let title = item.title.clone().unwrap_or_else(|| item.path.clone());
                let content = format!("# {}\n\n{}", title, item.snippet);

                let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
                metadata.insert("note_path".to_string(), item.path.clone().into());
                metadata.insert("title".to_string(), title.into());
                metadata.insert("updated".to_string(), item.updated.into());
                metadata.insert("vault_url".to_string(), self.vault_url.clone().into());

                RetrievalResult {
                    token_count: crate::utils::estimate_tokens(&content),
                    content,
                    source_type: SourceType::Vault,
                    source_path: item.path,
                    // The vault service ranks with FTS5, which is BM25-shaped
                    retrieval_method: RetrievalMethod::Bm25,
                    score: item.score.unwrap_or(0.5).clamp(0.0, 1.0),
                    metadata,
                }
            })
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_response() {
        let json = r#"{
            "results": [
                {"path": "design/auth.md", "title": "Auth Design", "snippet": "JWT tokens", "score": 0.85, "updated": "2025-01-15T10:30:00Z"},
                {"snippet": "untitled note"}
            ]
        }"#;
        let parsed: VaultSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].path, "design/auth.md");
        assert_eq!(parsed.results[1].path, "unknown.md");
        assert!(parsed.results[1].score.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_vault_degrades_to_empty() {
        // Port 9 (discard) is not serving HTTP; must return empty, not error
        let retriever = VaultRetriever::new("http://127.0.0.1:9");
        let results = retriever.retrieve("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }
}
