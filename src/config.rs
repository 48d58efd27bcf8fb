//! TOML configuration.
//!
//! Every command reads one file (default `./config/rgpd.toml`). Secrets are
//! never stored here: the OpenAI-compatible providers read `OPENAI_API_KEY`
//! from the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    /// Number of chunks assembled into an answer context.
    #[serde(default = "default_context_k")]
    pub context_k: i64,
    /// `auto`, `keyword`, `semantic` or `hybrid`.
    #[serde(default = "default_context_mode")]
    pub context_mode: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            context_k: default_context_k(),
            context_mode: default_context_mode(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_context_k() -> i64 {
    5
}
fn default_context_mode() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of the provider API. Falls back to the provider's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn base_url(&self) -> String {
        let default = match self.provider.as_str() {
            "ollama" => "http://localhost:11434",
            _ => OPENAI_BASE_URL,
        };
        trim_base(self.url.as_deref().unwrap_or(default))
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Tu es un expert du RGPD qui répond de manière précise et concise. \
Tu as accès à une base de données de documents juridiques. \
Tu dois répondre à la question en ajoutant les articles cités ainsi que leur numéro quand cela est possible.";

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_http_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_llm_model(),
            url: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_http_retries(),
            temperature: None,
            system_prompt: default_system_prompt(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn base_url(&self) -> String {
        trim_base(self.url.as_deref().unwrap_or(OPENAI_BASE_URL))
    }
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_http_retries() -> u32 {
    3
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
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
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_regulation_path")]
    pub regulation_path: String,
    #[serde(default = "default_sanctions_path")]
    pub sanctions_path: String,
    #[serde(default = "default_from_year")]
    pub sanctions_from_year: i32,
    #[serde(default = "default_to_year")]
    pub sanctions_to_year: i32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_http_retries")]
    pub max_retries: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            regulation_path: default_regulation_path(),
            sanctions_path: default_sanctions_path(),
            sanctions_from_year: default_from_year(),
            sanctions_to_year: default_to_year(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_http_retries(),
        }
    }
}

impl ScraperConfig {
    pub fn regulation_url(&self) -> String {
        join_url(&self.base_url, &self.regulation_path)
    }

    pub fn sanctions_url(&self) -> String {
        join_url(&self.base_url, &self.sanctions_path)
    }
}

fn default_base_url() -> String {
    "https://www.cnil.fr".to_string()
}
fn default_regulation_path() -> String {
    "/fr/reglement-europeen-protection-donnees".to_string()
}
fn default_sanctions_path() -> String {
    "/fr/les-sanctions-prononcees-par-la-cnil".to_string()
}
fn default_from_year() -> i32 {
    2019
}
fn default_to_year() -> i32 {
    2023
}
fn default_user_agent() -> String {
    concat!("rgpd-harness/", env!("CARGO_PKG_VERSION")).to_string()
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", trim_base(base), path.trim_start_matches('/'))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    let retrieval = &config.retrieval;
    if retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if retrieval.context_k < 1 {
        bail!("retrieval.context_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    match retrieval.context_mode.as_str() {
        "auto" | "keyword" | "semantic" | "hybrid" => {}
        other => bail!(
            "Unknown retrieval.context_mode: '{}'. Must be auto, keyword, semantic, or hybrid.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.scraper.sanctions_from_year > config.scraper.sanctions_to_year {
        bail!("scraper.sanctions_from_year must be <= scraper.sanctions_to_year");
    }

    Ok(())
}
