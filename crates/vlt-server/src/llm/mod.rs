// crates/vlt-server/src/llm/mod.rs
// Chat-completion and embedding client over an OpenAI-compatible API

use crate::config::Settings;
use crate::error::{Result, VltError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

/// HTTP timeout for embedding requests
const EMBED_TIMEOUT_SECS: u64 = 10;

/// HTTP timeout for summary generation
const SUMMARY_TIMEOUT_SECS: u64 = 30;

/// Max characters to embed (truncate longer text)
const MAX_EMBED_CHARS: usize = 8000;

/// Embedding model used for all vectors (1536 dimensions)
const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Outcome of a chat completion.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub total_tokens: u64,
}

/// Client for the chat-completions and embeddings endpoints.
///
/// One shared reqwest client; per-call timeouts are set on each request
/// because the pipeline phases have different deadlines.
pub struct LlmClient {
    settings: Settings,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.settings.has_api_key()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn synthesis_model(&self) -> &str {
        &self.settings.synthesis_model
    }

    pub fn rerank_model(&self) -> &str {
        &self.settings.rerank_model
    }

    /// Single-prompt chat completion.
    pub async fn chat(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ChatOutcome> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| VltError::Llm("no API key configured".to_string()))?;

        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.settings.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VltError::Llm(format!("chat completion timed out ({}s)", timeout.as_secs()))
                } else {
                    VltError::Llm(format!("chat request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("LLM API error {}: {}", status, crate::utils::truncate(&text, 200));
            return Err(VltError::Llm(format!("LLM API returned {status}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VltError::Llm(format!("invalid chat response: {e}")))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| VltError::Llm("no content in chat response".to_string()))?
            .to_string();

        let total_tokens = data["usage"]["total_tokens"].as_u64().unwrap_or(0);

        Ok(ChatOutcome {
            content,
            total_tokens,
        })
    }

    /// Embed a single text, truncated to the model's practical limit.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or_else(|| VltError::Embedding("no API key configured".to_string()))?;

        let text = if text.len() > MAX_EMBED_CHARS {
            debug!("Truncating embed input from {} to {} chars", text.len(), MAX_EMBED_CHARS);
            crate::utils::truncate(text, MAX_EMBED_CHARS)
        } else {
            text.to_string()
        };

        let body = serde_json::json!({
            "model": EMBEDDING_MODEL,
            "input": text,
        });

        let response = self
            .http
            .post(format!("{}/embeddings", self.settings.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| VltError::Embedding(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VltError::Embedding(format!(
                "embedding API returned {}",
                response.status()
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VltError::Embedding(format!("invalid embedding response: {e}")))?;

        let values = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| VltError::Embedding("no embedding in response".to_string()))?;

        Ok(values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }
}

/// Seam for thread summarisation, so the lazy summariser can be exercised
/// without a live endpoint.
#[async_trait]
pub trait SummaryModel: Send + Sync {
    /// Fold `new_content` into `context`, producing an updated summary.
    /// An empty `context` means a from-scratch summary.
    async fn generate_summary(&self, context: &str, new_content: &str) -> Result<String>;

    /// Model identifier recorded in the summary cache.
    fn model_name(&self) -> String;
}

#[async_trait]
impl SummaryModel for LlmClient {
    async fn generate_summary(&self, context: &str, new_content: &str) -> Result<String> {
        let prompt = format!(
            "You are the librarian for an AI agent's long-term memory. Maintain a \
             structured state summary that lets the agent resume work immediately.\n\n\
             CURRENT STATE:\n{context}\n\n\
             NEW THOUGHTS:\n{new_content}\n\n\
             INSTRUCTIONS:\n\
             Update the state to reflect the new thoughts. Do not append a log; \
             synthesize. Output markdown with sections: Status, \
             Context & Architecture (current facts only, prune obsolete info), \
             Pivot Log (last 3 major decisions), Next Steps."
        );

        let outcome = self
            .chat(
                &self.settings.synthesis_model,
                &prompt,
                0.3,
                2000,
                Duration::from_secs(SUMMARY_TIMEOUT_SECS),
            )
            .await?;

        Ok(outcome.content)
    }

    fn model_name(&self) -> String {
        self.settings.synthesis_model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chat_without_key_is_llm_error() {
        let client = LlmClient::new(Settings::default());
        let err = client
            .chat("m", "hi", 0.0, 10, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VltError::Llm(_)));
    }

    #[tokio::test]
    async fn test_embed_without_key_is_embedding_error() {
        let client = LlmClient::new(Settings::default());
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, VltError::Embedding(_)));
    }
}
