//! Configuration parsing and validation.
//!
//! The assistant is configured by a TOML file (default
//! `config/hra.toml`). Only `[index]` is required; every other section has
//! defaults matching a stock OpenAI setup.
//!
//! ```toml
//! [index]
//! path = "./data/hr-index.sqlite"
//!
//! [documents]
//! root = "./policies"
//! include_globs = ["**/*.pdf", "**/*.txt", "**/*.md"]
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! top_k = 4
//!
//! [embedding]
//! model = "text-embedding-ada-002"
//! dims = 1536
//!
//! [generation]
//! model = "gpt-4"
//! temperature = 0.1
//! max_answer_tokens = 500
//!
//! [sessions]
//! max_turns = 10
//! max_sessions = 1000
//! idle_timeout_secs = 3600
//! ```
//!
//! API keys are never stored in the file. `api_key_env` names the
//! environment variable that holds them (default `OPENAI_API_KEY`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use hr_assistant_core::answer::{GroundingMode, SynthesisOptions};
use hr_assistant_core::chunk::{ChunkUnit, ChunkingOptions};
use hr_assistant_core::retry::RetryPolicy;
use hr_assistant_core::Error;

use crate::assistant::SessionLimits;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub unit: ChunkUnit,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            unit: ChunkUnit::default(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkingOptions {
        ChunkingOptions::new(self.chunk_size, self.chunk_overlap).with_unit(self.unit)
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Texts per embedding request during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
        }
    }
}

impl EmbeddingConfig {
    pub fn api_key(&self) -> hr_assistant_core::Result<String> {
        read_api_key(&self.api_key_env, "embedding")
    }
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Prior turns (user and assistant) included in each prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default)]
    pub grounding: GroundingMode,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_answer_tokens: default_max_answer_tokens(),
            max_context_chars: default_max_context_chars(),
            history_turns: default_history_turns(),
            grounding: GroundingMode::default(),
        }
    }
}

impl GenerationConfig {
    pub fn api_key(&self) -> hr_assistant_core::Result<String> {
        read_api_key(&self.api_key_env, "generation")
    }

    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            temperature: self.temperature,
            max_answer_tokens: self.max_answer_tokens,
            max_context_chars: self.max_context_chars,
            history_turns: self.history_turns,
            grounding: self.grounding,
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_answer_tokens() -> u32 {
    500
}
fn default_max_context_chars() -> usize {
    4000
}
fn default_history_turns() -> usize {
    6
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_jitter() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

/// Limits on in-memory conversations.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    /// Turns (user and assistant) stored per session.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl SessionsConfig {
    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            max_turns: self.max_turns,
            max_sessions: self.max_sessions,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

fn default_max_turns() -> usize {
    10
}
fn default_max_sessions() -> usize {
    1000
}
fn default_idle_timeout_secs() -> u64 {
    3600
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
    "127.0.0.1:7860".to_string()
}

fn read_api_key(var: &str, purpose: &str) -> hr_assistant_core::Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(Error::config(format!(
            "{} environment variable not set (required for {})",
            var, purpose
        ))),
    }
}

impl Config {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> hr_assistant_core::Result<()> {
        self.chunking.options().validate()?;

        if self.retrieval.top_k < 1 {
            return Err(Error::config("retrieval.top_k must be >= 1"));
        }
        if self.embedding.dims == 0 {
            return Err(Error::config("embedding.dims must be > 0"));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be > 0"));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(Error::config("embedding.model must not be empty"));
        }
        if self.generation.model.trim().is_empty() {
            return Err(Error::config("generation.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(Error::config("generation.temperature must be in [0.0, 2.0]"));
        }
        if self.generation.max_answer_tokens == 0 {
            return Err(Error::config("generation.max_answer_tokens must be > 0"));
        }
        if self.generation.max_context_chars == 0 {
            return Err(Error::config("generation.max_context_chars must be > 0"));
        }
        if self.sessions.max_turns < self.generation.history_turns {
            return Err(Error::config(
                "sessions.max_turns must be >= generation.history_turns",
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(Error::config("sessions.max_sessions must be > 0"));
        }
        if self.sessions.idle_timeout_secs == 0 {
            return Err(Error::config("sessions.idle_timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be >= 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config("retry.base_delay_ms must not exceed retry.max_delay_ms"));
        }
        if self.retry.timeout_secs == 0 {
            return Err(Error::config("retry.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;

    config.validate()?;
    Ok(config)
}
