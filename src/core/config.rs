//! Configuration management for CodeShift

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides `completion.api_key`
pub const API_KEY_ENV: &str = "CODESHIFT_API_KEY";

/// Main configuration for the CodeShift service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// File collection limits
    pub parser: ParserConfig,

    /// Completion service
    pub completion: CompletionConfig,

    /// Question answering
    pub query: QueryConfig,

    /// Code conversion
    pub conversion: ConversionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            parser: ParserConfig::default(),
            completion: CompletionConfig::default(),
            query: QueryConfig::default(),
            conversion: ConversionConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codeshift.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Limits applied while collecting project files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Larger files are skipped
    pub max_file_size_bytes: u64,

    /// At most this many files are taken, in path order
    pub max_files: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            max_files: 5000,
        }
    }
}

/// Which completion backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    OpenAi,
    Azure,
    None,
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: CompletionProvider,

    /// Base URL; OpenAI's public API when unset
    pub endpoint: Option<String>,

    /// Model name (OpenAI)
    pub model: String,

    /// Deployment name (Azure)
    pub deployment: Option<String>,

    /// API version (Azure)
    pub api_version: String,

    /// Overridden by `CODESHIFT_API_KEY`
    pub api_key: Option<String>,

    /// Per-call timeout
    pub timeout_secs: u64,

    /// Extra attempts for retryable failures
    pub max_retries: u32,

    pub max_output_tokens: u32,

    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::None,
            endpoint: None,
            model: "gpt-4o-mini".to_string(),
            deployment: None,
            api_version: "2024-05-01-preview".to_string(),
            api_key: None,
            timeout_secs: 60,
            max_retries: 2,
            max_output_tokens: 1500,
            temperature: 0.3,
        }
    }
}

/// Retrieval settings for question answering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Upper bound on serialized context size
    pub context_budget_chars: usize,

    /// Neighborhood expansion depth around matched nodes
    pub expansion_depth: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: 12_000,
            expansion_depth: 2,
        }
    }
}

/// Conversion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Upper bound on dependency context passed with each unit
    pub context_budget_chars: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: 24_000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.completion.api_key = Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [completion]
            provider = "azure"
            deployment = "gpt-4o-mini"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.completion.provider, CompletionProvider::Azure);
        assert_eq!(config.parser.max_files, 5000);
        assert_eq!(config.parser.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.query.expansion_depth, 2);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codeshift.toml");
        let mut config = Config::default();
        config.query.context_budget_chars = 500;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.query.context_budget_chars, 500);
    }
}
