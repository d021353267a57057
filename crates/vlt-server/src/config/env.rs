// crates/vlt-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, warn};

/// Default chat-completions base URL.
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default vault document service URL.
const DEFAULT_VAULT_URL: &str = "http://localhost:8000";

/// Runtime settings loaded from environment variables.
///
/// `~/.vlt/.env` is loaded first (via dotenvy) so `vlt config set-key`
/// survives across shells; real environment variables win.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Chat/embeddings API key (OPENROUTER_API_KEY)
    pub api_key: Option<String>,
    /// Chat/embeddings base URL (OPENROUTER_BASE_URL)
    pub base_url: String,
    /// Vault document service base URL (VLT_VAULT_URL)
    pub vault_url: String,
    /// Bearer token for the sync daemon's remote backend (VLT_SYNC_TOKEN)
    pub sync_token: Option<String>,
    /// Synthesis model for Oracle answers
    pub synthesis_model: String,
    /// Cheap model used for reranking
    pub rerank_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            vault_url: DEFAULT_VAULT_URL.to_string(),
            sync_token: None,
            synthesis_model: "anthropic/claude-sonnet-4".to_string(),
            rerank_model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// Loads ~/.vlt/.env first (never the CWD — a hostile repo must not be
    /// able to override API keys), then reads the process environment.
    pub fn from_env() -> Self {
        if let Some(home) = dirs::home_dir() {
            if let Err(e) = dotenvy::from_path(home.join(".vlt/.env")) {
                debug!("No global .env file loaded: {}", e);
            }
        }

        let settings = Self {
            api_key: read_var("OPENROUTER_API_KEY"),
            base_url: read_var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            vault_url: read_var("VLT_VAULT_URL").unwrap_or_else(|| DEFAULT_VAULT_URL.to_string()),
            sync_token: read_var("VLT_SYNC_TOKEN"),
            ..Self::default()
        };

        if settings.api_key.is_none() {
            warn!("No API key configured - LLM features will fall back to deterministic paths");
        }

        settings
    }

    /// True when chat/embedding calls can be made.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Path to the global env file written by `vlt config set-key`.
    pub fn env_file_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vlt")
            .join(".env")
    }
}

/// Read an environment variable, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(!settings.has_api_key());
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.vault_url, DEFAULT_VAULT_URL);
        assert_eq!(settings.rerank_model, "openai/gpt-4o-mini");
    }
}
