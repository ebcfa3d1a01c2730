//! Runtime configuration for prompt-gateway.
//!
//! Settings come from three layers, lowest priority first: built-in defaults,
//! an optional JSON file, and the process environment (a `.env` file in the
//! working directory is folded into the environment at startup).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the upstream API credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable overriding the default model id.
pub const MODEL_ENV: &str = "OPENAI_MODEL";

/// Environment variable overriding the upstream base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Model used when neither the request nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upstream API root used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "prompt-gateway", about = "Prompt, chat and streaming gateway for a hosted LLM")]
pub struct Cli {
    /// Path to an optional configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing OPENAI_API_KEY. Set it in your environment or .env file.")]
    MissingApiKey,

    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream provider configuration.
    pub upstream: UpstreamConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8000").
    pub listen: String,

    /// Whole-request timeout for non-streaming upstream calls, in seconds.
    pub request_timeout_secs: u64,

    /// Connect timeout for every upstream call, in seconds.
    pub connect_timeout_secs: u64,

    /// Longest silence tolerated between two reads of an upstream body, in
    /// seconds. The only bound on a stalled stream.
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
        }
    }
}

/// Upstream provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API root, without the trailing `/responses`.
    pub base_url: String,

    /// Model used when a request does not override it.
    pub default_model: String,

    /// Bearer credential. Only ever read from the environment.
    #[serde(skip)]
    pub api_key: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
        }
    }
}

// Hand-written so the credential never ends up in logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Overlay environment variables. Fails if no API key is available.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        self.upstream.api_key = non_blank(API_KEY_ENV).ok_or(ConfigError::MissingApiKey)?;
        if let Some(model) = non_blank(MODEL_ENV) {
            self.upstream.default_model = model;
        }
        if let Some(base_url) = non_blank(BASE_URL_ENV) {
            self.upstream.base_url = base_url;
        }
        Ok(self)
    }

    /// Load the file layer and then the process environment.
    pub fn from_sources(path: &Path) -> Result<Self, ConfigError> {
        Self::load(path)?.apply_env(|key| std::env::var(key).ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.server.read_timeout_secs)
    }

    /// Whether a non-blank API key is configured.
    pub fn api_key_present(&self) -> bool {
        !self.upstream.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.upstream.default_model, "gpt-4o-mini");
        assert_eq!(cfg.server.request_timeout_secs, 300);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(60));
        assert!(!cfg.api_key_present());
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let err = Config::default().apply_env(env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let err = Config::default()
            .apply_env(env(&[(API_KEY_ENV, "   ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::default()
            .apply_env(env(&[
                (API_KEY_ENV, "sk-test"),
                (MODEL_ENV, "gpt-4.1"),
                (BASE_URL_ENV, "http://localhost:9999/v1"),
            ]))
            .unwrap();
        assert!(cfg.api_key_present());
        assert_eq!(cfg.upstream.default_model, "gpt-4.1");
        assert_eq!(cfg.upstream.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn test_debug_redacts_key() {
        let cfg = Config::default()
            .apply_env(env(&[(API_KEY_ENV, "sk-secret")]))
            .unwrap();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"request_timeout_secs": 30, "read_timeout_secs": 5}}}}"#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.server.request_timeout_secs, 30);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.server.connect_timeout_secs, 10);
        assert_eq!(cfg.server.listen, "0.0.0.0:8000");
        assert_eq!(cfg.upstream.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.upstream.default_model, DEFAULT_MODEL);
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
