use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for FundRAG
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FundRagConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub prompt: PromptConfig,

    #[serde(default)]
    pub answer: AnswerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub groww: GrowwConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of nearest neighbours requested from the index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Cosine similarity floor; hits below it are dropped
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Per-query timeout on the vector index
    #[serde(default = "default_retrieval_timeout_ms")]
    pub timeout_ms: u64,

    /// Longest accepted question, in characters
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Path to the index snapshot exported by ingestion
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            timeout_ms: default_retrieval_timeout_ms(),
            max_query_length: default_max_query_length(),
            index_path: None,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "ollama", "openai", "hashing"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Must be the model the index was built with
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            ollama_url: default_ollama_url(),
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider: "gemini", "openai", "openai-compatible", "anthropic", "ollama", "local"
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Model name; each provider has its own default
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub gemini_api_key: Option<String>,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    /// Base URL for "openai-compatible"
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Endpoint for the "local" provider
    #[serde(default = "default_local_url")]
    pub local_url: String,

    /// Bearer token for the "local" provider, if it wants one
    #[serde(default)]
    pub local_api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            base_url: None,
            ollama_url: default_ollama_url(),
            local_url: default_local_url(),
            local_api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Character budget for all serialized chunks together
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Per-chunk cap before the overall budget applies
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Below this the answer is replaced by the fallback template
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Added per corroborating chunk beyond the best one
    #[serde(default = "default_corroboration_bonus")]
    pub corroboration_bonus: f32,

    /// Cap on corroborating chunks that count towards the bonus
    #[serde(default = "default_max_corroboration")]
    pub max_corroboration: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            corroboration_bonus: default_corroboration_bonus(),
            max_corroboration: default_max_corroboration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Total LLM attempts for retryable failures
    #[serde(default = "default_generation_attempts")]
    pub generation_attempts: u32,

    /// Total retrieval attempts for transient failures
    #[serde(default = "default_retrieval_attempts")]
    pub retrieval_attempts: u32,

    /// First backoff delay; doubles per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default)]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_attempts: default_generation_attempts(),
            retrieval_attempts: default_retrieval_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            cache_enabled: false,
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GrowwConfig {
    /// JSON/YAML/TOML page-mapping table; built-in table when unset
    #[serde(default)]
    pub mapping_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.5
}
fn default_retrieval_timeout_ms() -> u64 {
    5_000
}
fn default_max_query_length() -> usize {
    1000
}
fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_local_url() -> String {
    "http://localhost:8080/generate".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> usize {
    500
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_max_chunk_chars() -> usize {
    1500
}
fn default_min_confidence() -> f32 {
    0.3
}
fn default_corroboration_bonus() -> f32 {
    0.05
}
fn default_max_corroboration() -> usize {
    4
}
fn default_generation_attempts() -> u32 {
    2
}
fn default_retrieval_attempts() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_cache_capacity() -> usize {
    512
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

pub const EMBEDDING_PROVIDERS: &[&str] = &["ollama", "openai", "hashing"];
pub const LLM_PROVIDERS: &[&str] = &[
    "gemini",
    "openai",
    "openai-compatible",
    "anthropic",
    "ollama",
    "local",
];

/// Configuration manager
pub struct ConfigManager {
    config: FundRagConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (./fundrag.toml, then ~/.fundrag/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_dotenv();
        let (config, config_path) = Self::load_config_file()?;
        Self::finish(config, config_path)
    }

    /// Load from an explicit file instead of searching the default locations
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_dotenv();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        Self::finish(config, Some(path.to_path_buf()))
    }

    /// Wrap an in-memory configuration, still validating it
    pub fn from_config(config: FundRagConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn finish(config: FundRagConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        info!("Configuration loaded");
        match config_path {
            Some(ref path) => info!("  config file: {}", path.display()),
            None => info!("  config file: none (using defaults)"),
        }
        info!(
            "  embedding: {} / {} ({} dims)",
            config.embedding.provider, config.embedding.model, config.embedding.dimension
        );
        info!("  llm provider: {}", config.llm.provider);
        info!(
            "  retrieval: top_k={} min_similarity={}",
            config.retrieval.top_k, config.retrieval.min_similarity
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load .env file if it exists
    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".fundrag.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .fundrag.env: {}", e);
                }
            }
        }
    }

    fn load_config_file() -> Result<(FundRagConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new("fundrag.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".fundrag").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((FundRagConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<FundRagConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(config: FundRagConfig) -> FundRagConfig {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Split out so tests don't touch the
    /// process environment.
    fn apply_overrides_from<F>(mut config: FundRagConfig, lookup: F) -> FundRagConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        // Retrieval
        if let Some(top_k) = lookup("FUNDRAG_TOP_K").and_then(|v| v.parse().ok()) {
            config.retrieval.top_k = top_k;
        }
        if let Some(threshold) = lookup("FUNDRAG_MIN_SIMILARITY").and_then(|v| v.parse().ok()) {
            config.retrieval.min_similarity = threshold;
        }
        if let Some(path) = lookup("FUNDRAG_INDEX_PATH") {
            config.retrieval.index_path = Some(PathBuf::from(path));
        }

        // Embedding
        if let Some(provider) = lookup("FUNDRAG_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Some(model) = lookup("FUNDRAG_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dim) = lookup("FUNDRAG_EMBEDDING_DIMENSION").and_then(|v| v.parse().ok()) {
            config.embedding.dimension = dim;
        }
        if let Some(url) = lookup("FUNDRAG_OLLAMA_URL") {
            config.embedding.ollama_url = url.clone();
            config.llm.ollama_url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            config.embedding.openai_api_key = Some(key.clone());
            config.llm.openai_api_key = Some(key);
        }

        // LLM
        if let Some(provider) = lookup("FUNDRAG_LLM_PROVIDER").or_else(|| lookup("LLM_PROVIDER")) {
            config.llm.provider = provider;
        }
        if let Some(model) = lookup("FUNDRAG_LLM_MODEL") {
            config.llm.model = Some(model);
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            config.llm.gemini_api_key = Some(key);
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            config.llm.anthropic_api_key = Some(key);
        }
        if let Some(url) = lookup("FUNDRAG_LLM_BASE_URL") {
            config.llm.base_url = Some(url);
        }
        if let Some(url) = lookup("FUNDRAG_LOCAL_LLM_URL") {
            config.llm.local_url = url;
        }
        if let Some(key) = lookup("FUNDRAG_LOCAL_LLM_API_KEY") {
            config.llm.local_api_key = Some(key);
        }
        if let Some(t) = lookup("FUNDRAG_TEMPERATURE").and_then(|v| v.parse().ok()) {
            config.llm.temperature = t;
        }
        if let Some(tokens) = lookup("FUNDRAG_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            config.llm.max_tokens = tokens;
        }
        if let Some(secs) = lookup("FUNDRAG_LLM_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.llm.timeout_secs = secs;
        }

        // Pipeline
        if let Some(enabled) = lookup("FUNDRAG_CACHE_ENABLED") {
            config.pipeline.cache_enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }
        if let Some(path) = lookup("FUNDRAG_GROWW_MAPPINGS") {
            config.groww.mapping_path = Some(PathBuf::from(path));
        }

        // Logging
        if let Some(level) = lookup("FUNDRAG_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    fn validate_config(config: &FundRagConfig) -> Result<(), ConfigError> {
        if !EMBEDDING_PROVIDERS.contains(&config.embedding.provider.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid embedding provider: {}. Must be one of: {}",
                config.embedding.provider,
                EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        if !LLM_PROVIDERS.contains(&config.llm.provider.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid LLM provider: {}. Must be one of: {}",
                config.llm.provider,
                LLM_PROVIDERS.join(", ")
            )));
        }

        if config.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&config.retrieval.min_similarity) {
            return Err(ConfigError::ValidationError(format!(
                "retrieval.min_similarity must be within [-1, 1], got {}",
                config.retrieval.min_similarity
            )));
        }

        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "llm.temperature must be within [0, 2], got {}",
                config.llm.temperature
            )));
        }

        if config.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if config.pipeline.generation_attempts == 0 || config.pipeline.retrieval_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline attempts must be at least 1".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &FundRagConfig {
        &self.config
    }

    pub fn into_config(self) -> FundRagConfig {
        self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Create a default config file
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = FundRagConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
