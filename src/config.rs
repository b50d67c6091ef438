//! Configuration parsing and validation.
//!
//! docdex is configured via a TOML file (default: `docdex.toml`). The config
//! defines the database path, the embedding model selection string, scraper
//! defaults, and the HTTP server bind address. Every section is optional;
//! a missing file yields the defaults.
//!
//! Credentials are never placed in the file: the embedding provider reads
//! them from the environment (`OPENAI_API_KEY`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/docdex.sqlite")
}

/// Embedding model selection and provider tuning.
///
/// `model` is a single `provider:model` string (e.g.
/// `"openai:text-embedding-3-small"`, `"ollama:nomic-embed-text"`).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Override for the provider's native dimension when it is not one of
    /// the known models.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for HTTP providers that serve from a local endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "openai:text-embedding-3-small".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
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
    "127.0.0.1:6280".to_string()
}

/// Defaults applied to scrape jobs that do not specify their own limits.
#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Concurrent scrape jobs run by the pipeline manager.
    #[serde(default = "default_job_concurrency")]
    pub job_concurrency: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            max_concurrency: default_max_concurrency(),
            job_concurrency: default_job_concurrency(),
        }
    }
}

fn default_max_pages() -> usize {
    1000
}
fn default_max_depth() -> usize {
    3
}
fn default_max_concurrency() -> usize {
    3
}
fn default_job_concurrency() -> usize {
    3
}

/// Load configuration from `path`. A missing file is not an error: all
/// defaults apply. A present-but-invalid file is.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
    if config.scraper.max_concurrency == 0 || config.scraper.job_concurrency == 0 {
        anyhow::bail!("scraper concurrency settings must be positive");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/docdex.toml")).unwrap();
        assert_eq!(config.embedding.model, "openai:text-embedding-3-small");
        assert_eq!(config.scraper.max_pages, 1000);
        assert_eq!(config.scraper.max_depth, 3);
        assert_eq!(config.server.bind, "127.0.0.1:6280");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            model = "ollama:nomic-embed-text"
            dims = 768

            [scraper]
            max_pages = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.model, "ollama:nomic-embed-text");
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.scraper.max_pages, 50);
        assert_eq!(config.scraper.max_depth, 3);
    }
}
