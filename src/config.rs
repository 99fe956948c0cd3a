use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_tokens: default_min_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_min_tokens() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Number of prior chat messages fed into retrieval and prompting.
    #[serde(default = "default_history_window")]
    pub history_window: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            history_window: default_history_window(),
        }
    }
}

fn default_limit() -> usize {
    8
}
fn default_history_window() -> i64 {
    6
}

/// Settings for the external transcription/summarization/embedding/chat
/// engine. When `api_key` is absent (config and environment), every consumer
/// falls back to its deterministic offline strategy.
#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_transcribe_model")]
    pub transcribe_model: String,
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            transcribe_model: default_transcribe_model(),
            summary_model: default_summary_model(),
            chat_model: None,
            embed_model: default_embed_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl OpenAiConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }

    pub fn is_enabled(&self) -> bool {
        self.resolved_api_key().is_some()
    }

    pub fn chat_model(&self) -> &str {
        self.chat_model.as_deref().unwrap_or(&self.summary_model)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_transcribe_model() -> String {
    "gpt-4o-transcribe".to_string()
}
fn default_summary_model() -> String {
    "gpt-4o".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

/// External reading search (Google Custom Search). Optional enhancement;
/// disabled unless both key and cx are present.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cx: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl SearchConfig {
    pub fn is_enabled(&self) -> bool {
        self.resolved().is_some()
    }

    pub fn resolved(&self) -> Option<(String, String)> {
        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_SEARCH_API_KEY").ok())
            .filter(|k| !k.is_empty())?;
        let cx = self
            .cx
            .clone()
            .or_else(|| std::env::var("GOOGLE_SEARCH_CX").ok())
            .filter(|c| !c.is_empty())?;
        Some((key, cx))
    }
}

fn default_max_results() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.min_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be < chunking.max_tokens");
    }
    if config.retrieval.limit < 1 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if config.openai.timeout_secs == 0 {
        anyhow::bail!("openai.timeout_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "./data/scribe.sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.max_tokens, 700);
        assert_eq!(config.chunking.min_tokens, 200);
        assert_eq!(config.retrieval.limit, 8);
        assert_eq!(config.retrieval.history_window, 6);
        assert_eq!(config.openai.timeout_secs, 120);
        assert_eq!(config.openai.embed_model, "text-embedding-3-small");
        assert_eq!(config.openai.chat_model(), "gpt-4o");
        assert!(!config.search.is_enabled());
    }
}
