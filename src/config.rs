//! Configuration management for BrainSpark
//!
//! TOML-based configuration with defaults and validation.
//! Location: ~/.brainspark/config.toml
//!
//! Secrets are never stored in the file: each provider section names the
//! environment variable holding its key, resolved at construction time.

use crate::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete configuration for the knowledge and memory core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub storage: StorageConfig,
    pub embedder: EmbedderConfig,
    pub model: ModelConfig,
    pub vector: VectorConfig,
    pub chunking: ChunkingConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

/// Hosted or local model provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Ollama,
}

/// Durable state location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: String,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub provider: Provider,
    pub model: String,
    pub dimensions: usize,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

/// Vector backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Local,
    Qdrant,
}

/// Distance metric used for nearest-neighbour search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackend,
    pub url: String,
    /// Only set for servers that require authentication
    pub api_key_env: Option<String>,
    pub distance: DistanceMetric,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

/// Chunking strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingKind {
    Fixed,
    Agentic,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkingKind,
    /// Window size in characters
    pub chunk_size: usize,
    /// Characters repeated at the start of each following window
    pub overlap: usize,
    /// Coarse section size sent to the model per boundary proposal
    pub section_chars: usize,
    pub temperature: f32,
    /// Model used for boundary proposals; falls back to `[model]` when unset
    pub model: Option<String>,
}

/// Agent turn configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: u64,
    pub knowledge_k: usize,
    pub memory_k: usize,
    pub history_turns: usize,
    pub require_retrieval: bool,
    pub add_datetime: bool,
    pub distill_memories: bool,
    pub agentic_filters: bool,
    pub relevance_threshold: f32,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "~/.brainspark".to_string(),
        }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: "text-embedding-004".to_string(),
            dimensions: 768,
            base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 30,
            batch_size: 32,
            max_attempts: 3,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.2,
            base_url: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 120,
            max_attempts: 3,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Local,
            url: "http://localhost:6334".to_string(),
            api_key_env: None,
            distance: DistanceMetric::Cosine,
            timeout_secs: 10,
            max_attempts: 3,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingKind::Fixed,
            chunk_size: 5000,
            overlap: 0,
            section_chars: 20_000,
            temperature: 0.2,
            model: Some("gemini-2.0-flash-lite".to_string()),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            tool_timeout_secs: 60,
            knowledge_k: 5,
            memory_k: 5,
            history_turns: 10,
            require_retrieval: false,
            add_datetime: true,
            distill_memories: true,
            agentic_filters: false,
            relevance_threshold: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "brainspark=info".to_string(),
            json: false,
        }
    }
}

impl CoreConfig {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(config_path) => Self::load_from_file(config_path),
            None => Self::load_default(),
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AgentError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(contents)
            .map_err(|e| AgentError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".brainspark").join("config.toml");
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(CoreConfig::default())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.embedder.dimensions == 0 {
            return Err(AgentError::ConfigError(
                "embedder.dimensions must be greater than 0".to_string(),
            ));
        }

        if self.embedder.batch_size == 0 {
            return Err(AgentError::ConfigError(
                "embedder.batch_size must be greater than 0".to_string(),
            ));
        }

        if self.chunking.chunk_size == 0 {
            return Err(AgentError::ConfigError(
                "chunking.chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(AgentError::ConfigError(
                "chunking.overlap must be less than chunking.chunk_size".to_string(),
            ));
        }

        if self.chunking.section_chars < self.chunking.chunk_size {
            return Err(AgentError::ConfigError(
                "chunking.section_chars must be at least chunking.chunk_size".to_string(),
            ));
        }

        if self.runtime.max_tool_rounds == 0 {
            return Err(AgentError::ConfigError(
                "runtime.max_tool_rounds must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.runtime.relevance_threshold) {
            return Err(AgentError::ConfigError(
                "runtime.relevance_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(AgentError::ConfigError(format!(
                "model.temperature out of range: {}",
                self.model.temperature
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AgentError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::ConfigError(format!("Failed to create config dir: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| AgentError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Root directory for all durable agent state
    pub fn storage_root(&self) -> PathBuf {
        Self::expand_path(&self.storage.root)
    }
}

impl EmbedderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl VectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RuntimeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Load a `.env` file from the working directory, if present.
///
/// Variables already set in the process environment win.
pub fn load_dotenv() {
    match dotenv::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to parse .env"),
    }
}

/// Resolve a secret from the environment, failing with a configuration error.
pub fn resolve_secret(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AgentError::ConfigError(format!(
            "Missing credential: environment variable {} is not set",
            env_var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.embedder.dimensions, 768);
        assert_eq!(config.chunking.chunk_size, 5000);
        assert_eq!(config.vector.distance, DistanceMetric::Cosine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            [embedder]
            provider = "ollama"
            model = "nomic-embed-text"

            [runtime]
            max_tool_rounds = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.embedder.provider, Provider::Ollama);
        assert_eq!(config.embedder.dimensions, 768);
        assert_eq!(config.runtime.max_tool_rounds, 3);
        assert_eq!(config.runtime.knowledge_k, 5);
    }

    #[test]
    fn test_validation_rejects_zero_dimension() {
        let mut config = CoreConfig::default();
        config.embedder.dimensions = 0;
        assert!(matches!(config.validate(), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_validation_rejects_overlap_not_below_chunk_size() {
        let mut config = CoreConfig::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_tool_rounds() {
        let mut config = CoreConfig::default();
        config.runtime.max_tool_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = CoreConfig::default();
        config.chunking.strategy = ChunkingKind::Agentic;
        config.save(&path).unwrap();

        let loaded = CoreConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.chunking.strategy, ChunkingKind::Agentic);
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let err = resolve_secret("BRAINSPARK_TEST_SURELY_UNSET_VAR").unwrap_err();
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = CoreConfig::expand_path("~/.brainspark");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
