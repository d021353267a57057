// crates/vlt-server/src/config/file.rs
// Project configuration from vlt.toml, searched upward from cwd

use crate::error::{Result, VltError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level vlt.toml structure. Only `[project]` is required; every other
/// section falls back to built-in defaults when absent.
#[derive(Debug, Deserialize)]
pub struct VltConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub coderag: CoderagConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

/// Required `[project]` table.
#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub id: String,
    pub description: Option<String>,
}

/// `[coderag]` section.
#[derive(Debug, Deserialize, Clone)]
pub struct CoderagConfig {
    #[serde(default = "CoderagConfig::default_include")]
    pub include: Vec<String>,
    #[serde(default = "CoderagConfig::default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "CoderagConfig::default_languages")]
    pub languages: Vec<String>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub repomap: RepoMapConfig,
    #[serde(default)]
    pub delta: DeltaConfig,
}

impl Default for CoderagConfig {
    fn default() -> Self {
        Self {
            include: Self::default_include(),
            exclude: Self::default_exclude(),
            languages: Self::default_languages(),
            embedding: EmbeddingConfig::default(),
            repomap: RepoMapConfig::default(),
            delta: DeltaConfig::default(),
        }
    }
}

impl CoderagConfig {
    fn default_include() -> Vec<String> {
        vec![
            "src/**/*.py".to_string(),
            "lib/**/*.py".to_string(),
            "tests/**/*.py".to_string(),
        ]
    }
    fn default_exclude() -> Vec<String> {
        vec![
            "**/node_modules/**".to_string(),
            "**/__pycache__/**".to_string(),
            "**/.git/**".to_string(),
        ]
    }
    fn default_languages() -> Vec<String> {
        vec![
            "python".to_string(),
            "typescript".to_string(),
            "javascript".to_string(),
        ]
    }
}

/// `[coderag.embedding]` subtable.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "EmbeddingConfig::default_model")]
    pub model: String,
    #[serde(default = "EmbeddingConfig::default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            batch_size: Self::default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    fn default_model() -> String {
        "qwen/qwen3-embedding-8b".to_string()
    }
    fn default_batch_size() -> usize {
        10
    }
}

/// `[coderag.repomap]` subtable.
#[derive(Debug, Deserialize, Clone)]
pub struct RepoMapConfig {
    #[serde(default = "RepoMapConfig::default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "RepoMapConfig::default_include_signatures")]
    pub include_signatures: bool,
    #[serde(default)]
    pub include_docstrings: bool,
}

impl Default for RepoMapConfig {
    fn default() -> Self {
        Self {
            max_tokens: Self::default_max_tokens(),
            include_signatures: Self::default_include_signatures(),
            include_docstrings: false,
        }
    }
}

impl RepoMapConfig {
    fn default_max_tokens() -> usize {
        4000
    }
    fn default_include_signatures() -> bool {
        true
    }
}

/// `[coderag.delta]` subtable: re-index trigger thresholds.
#[derive(Debug, Deserialize, Clone)]
pub struct DeltaConfig {
    #[serde(default = "DeltaConfig::default_file_threshold")]
    pub file_threshold: usize,
    #[serde(default = "DeltaConfig::default_line_threshold")]
    pub line_threshold: u64,
    #[serde(default = "DeltaConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "DeltaConfig::default_jit_indexing")]
    pub jit_indexing: bool,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            file_threshold: Self::default_file_threshold(),
            line_threshold: Self::default_line_threshold(),
            timeout_seconds: Self::default_timeout_seconds(),
            jit_indexing: Self::default_jit_indexing(),
        }
    }
}

impl DeltaConfig {
    fn default_file_threshold() -> usize {
        5
    }
    fn default_line_threshold() -> u64 {
        1000
    }
    fn default_timeout_seconds() -> u64 {
        300
    }
    fn default_jit_indexing() -> bool {
        true
    }
}

/// `[oracle]` section.
#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    #[serde(default = "OracleConfig::default_vault_url")]
    pub vault_url: String,
    #[serde(default = "OracleConfig::default_synthesis_model")]
    pub synthesis_model: String,
    #[serde(default = "OracleConfig::default_rerank_model")]
    pub rerank_model: String,
    #[serde(default = "OracleConfig::default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            vault_url: Self::default_vault_url(),
            synthesis_model: Self::default_synthesis_model(),
            rerank_model: Self::default_rerank_model(),
            max_context_tokens: Self::default_max_context_tokens(),
        }
    }
}

impl OracleConfig {
    fn default_vault_url() -> String {
        "http://localhost:8000".to_string()
    }
    fn default_synthesis_model() -> String {
        "anthropic/claude-sonnet-4".to_string()
    }
    fn default_rerank_model() -> String {
        "openai/gpt-4o-mini".to_string()
    }
    fn default_max_context_tokens() -> usize {
        16000
    }
}

/// Find vlt.toml by walking upward from `start`.
pub fn find_vlt_toml(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join("vlt.toml");
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

/// Load and validate a vlt.toml file.
///
/// A malformed file or a missing `[project]` table surfaces as a
/// `VltError::Config` with a human-readable message.
pub fn load_vlt_config(path: &Path) -> Result<VltConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VltError::Config(format!("cannot read {}: {}", path.display(), e)))?;

    let config: VltConfig = toml::from_str(&contents)
        .map_err(|e| VltError::Config(format!("malformed {}: {}", path.display(), e)))?;

    debug!(path = %path.display(), project = %config.project.id, "Loaded vlt.toml");
    Ok(config)
}

/// Locate and load the nearest vlt.toml from the current directory.
pub fn load_from_cwd() -> Result<VltConfig> {
    let cwd = std::env::current_dir()?;
    let path = find_vlt_toml(&cwd).ok_or_else(|| {
        VltError::Config("no vlt.toml found in this directory or any parent".to_string())
    })?;
    load_vlt_config(&path)
}
