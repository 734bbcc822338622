use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Environment variable holding the chat model credential.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Top-level configuration for the Parley backend.
///
/// Loaded from `parley.toml` by default, then overridden by environment
/// variables (see [`ParleyConfig::apply_env`]) and CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the environment source.
    ///
    /// Empty values are ignored. An unparsable `PARLEY_PORT` is ignored too.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(API_KEY_ENV) {
            self.llm.api_key = Some(key);
        }
        if let Some(port) = get("PARLEY_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(path) = get("PARLEY_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(dir) = get("PARLEY_PERSIST_DIR") {
            self.vector.persist_dir = PathBuf::from(dir);
        }
        if let Some(name) = get("PARLEY_COLLECTION") {
            self.vector.collection = name;
        }
    }

    /// Check the conditions that must hold before the server may start.
    ///
    /// Fails when the chat model credential is missing, the vector index
    /// directory does not exist, or the collection name or `top_k` is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.api_key().is_none() {
            return Err(ParleyError::Config(format!(
                "Missing {} (set the env var or llm.api_key)",
                API_KEY_ENV
            )));
        }
        if !self.vector.persist_dir.is_dir() {
            return Err(ParleyError::Config(format!(
                "Vector store directory not found: {}",
                self.vector.persist_dir.display()
            )));
        }
        if self.vector.collection.trim().is_empty() {
            return Err(ParleyError::Config(
                "vector.collection must not be empty".to_string(),
            ));
        }
        if self.vector.top_k == 0 {
            return Err(ParleyError::Config(
                "vector.top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured credential, if it is non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.llm
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Socket address string the HTTP server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Conversation log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the `messages` table.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("chat_history.db"),
        }
    }
}

/// Vector store and embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Pre-built index directory. Must exist at startup.
    pub persist_dir: PathBuf,
    /// Collection inside the index directory.
    pub collection: String,
    /// Number of nearest neighbours fetched per question.
    pub top_k: usize,
    /// Embedding model name, reported in logs and dimension errors.
    pub embedding_model: String,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub embedding_model_dir: PathBuf,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("chroma_db"),
            collection: "articles_collection".to_string(),
            top_k: 2,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_model_dir: PathBuf::from("models/all-MiniLM-L6-v2"),
        }
    }
}

/// Hosted chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    /// Credential; normally supplied through `GOOGLE_API_KEY` instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: None,
            temperature: None,
            request_timeout_secs: 60,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset: trace, debug, info, warn, error.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_config(dir: &Path) -> ParleyConfig {
        let mut config = ParleyConfig::default();
        config.llm.api_key = Some("secret".to_string());
        config.vector.persist_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_default_config() {
        let config = ParleyConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.db_path, PathBuf::from("chat_history.db"));
        assert_eq!(config.vector.collection, "articles_collection");
        assert_eq!(config.vector.top_k, 2);
        assert_eq!(config.vector.embedding_model, "all-MiniLM-L6-v2");
        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert_eq!(config.llm.request_timeout_secs, 60);
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[server]
port = 9100

[vector]
collection = "handbook"
top_k = 4
"#;
        let file = create_temp_config(content);
        let config = ParleyConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.vector.collection, "handbook");
        assert_eq!(config.vector.top_k, 4);
        assert_eq!(config.llm.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        let result = ParleyConfig::load(file.path());
        assert!(matches!(result, Err(ParleyError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ParleyConfig::load_or_default(Path::new("/nonexistent/parley.toml"));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("parley.toml");

        let mut config = ParleyConfig::default();
        config.llm.temperature = Some(0.2);
        config.save(&path).unwrap();

        let reloaded = ParleyConfig::load(&path).unwrap();
        assert_eq!(reloaded.server.port, config.server.port);
        assert_eq!(reloaded.vector.persist_dir, config.vector.persist_dir);
        assert_eq!(reloaded.llm.temperature, Some(0.2));
        assert!(reloaded.llm.api_key.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ParleyConfig::default();
        config.apply_env_from(env(&[
            ("GOOGLE_API_KEY", "abc"),
            ("PARLEY_PORT", "9000"),
            ("PARLEY_DB_PATH", "/tmp/history.db"),
            ("PARLEY_PERSIST_DIR", "/srv/index"),
            ("PARLEY_COLLECTION", "faq"),
        ]));
        assert_eq!(config.api_key(), Some("abc"));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/history.db"));
        assert_eq!(config.vector.persist_dir, PathBuf::from("/srv/index"));
        assert_eq!(config.vector.collection, "faq");
    }

    #[test]
    fn test_env_ignores_blank_and_bad_values() {
        let mut config = ParleyConfig::default();
        config.apply_env_from(env(&[("GOOGLE_API_KEY", "  "), ("PARLEY_PORT", "eighty")]));
        assert!(config.api_key().is_none());
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_validate_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(valid_config(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_validate_missing_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.llm.api_key = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_validate_missing_persist_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_config(&dir.path().join("absent"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Vector store directory not found"));
    }

    #[test]
    fn test_validate_zero_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.vector.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_addr() {
        let mut config = ParleyConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 8123;
        assert_eq!(config.bind_addr(), "127.0.0.1:8123");
    }
}
