//! TOML-based configuration for metrica.
//!
//! Every section is optional. String values may reference environment
//! variables with `${VAR}` or `$VAR`.
//!
//! Example configuration:
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [logging]
//! level = "metrica=debug,info"
//! json = true
//!
//! [ontology]
//! path = "./ontology.toml"
//!
//! [store]
//! backend = "sqlite"
//! path = "${HOME}/.metrica/metrics.db"
//! max_retries = 3
//!
//! [llm]
//! enabled = true
//! command = "./llm-bridge"
//! model = "gpt-4o-mini"
//! api_key = "${OPENAI_API_KEY}"
//!
//! [classification]
//! min_composite_references = 2
//!
//! [mapping]
//! strategies = ["exact", "case_insensitive", "snake_case", "camel_case"]
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::mapping::{parse_strategies, MatchStrategy};
use crate::semantic::classifier::DEFAULT_MIN_COMPOSITE_REFERENCES;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z0-9_]+))").unwrap()
});

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub ontology: OntologySettings,
    pub store: StoreSettings,
    pub llm: LlmSettings,
    pub classification: ClassificationSettings,
    pub mapping: MappingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allow cross-origin requests from any origin.
    pub cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OntologySettings {
    /// TOML or JSON ontology document.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// SQLite database path. Defaults to the platform data directory.
    pub path: Option<String>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl StoreSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    /// Bridge executable speaking NDJSON over stdin/stdout.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub model: Option<String>,
    pub timeout_seconds: u64,
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command: None,
            args: Vec::new(),
            model: None,
            timeout_seconds: 60,
            api_key: None,
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn resolved_api_key(&self) -> SettingsResult<Option<String>> {
        self.api_key.as_deref().map(expand_env_vars).transpose()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassificationSettings {
    /// Known metrics an expression must reference to be COMPOSITE.
    pub min_composite_references: usize,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            min_composite_references: DEFAULT_MIN_COMPOSITE_REFERENCES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MappingSettings {
    /// Column match strategies, tried in order.
    pub strategies: Vec<String>,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            strategies: MatchStrategy::DEFAULT_ORDER
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl MappingSettings {
    pub fn match_strategies(&self) -> SettingsResult<Vec<MatchStrategy>> {
        parse_strategies(&self.strategies).map_err(|e| SettingsError::InvalidConfig(e.to_string()))
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.check()?;
        Ok(settings)
    }

    /// Load settings from `METRICA_CONFIG`, `./metrica.toml` or the user
    /// config directory, falling back to defaults.
    pub fn load() -> SettingsResult<Self> {
        if let Ok(path) = env::var("METRICA_CONFIG") {
            return Self::from_file(&path);
        }

        let local = PathBuf::from("metrica.toml");
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("metrica").join("config.toml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        Ok(Settings::default())
    }

    fn check(&self) -> SettingsResult<()> {
        self.mapping.match_strategies()?;
        if self.classification.min_composite_references == 0 {
            return Err(SettingsError::InvalidConfig(
                "classification.min_composite_references must be at least 1".to_string(),
            ));
        }
        if self.llm.enabled && self.llm.command.is_none() {
            return Err(SettingsError::InvalidConfig(
                "llm.command is required when llm.enabled is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ontology_path(&self) -> SettingsResult<Option<PathBuf>> {
        self.ontology
            .path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    pub fn store_path(&self) -> SettingsResult<Option<PathBuf>> {
        self.store
            .path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    pub fn llm_command(&self) -> SettingsResult<Option<PathBuf>> {
        self.llm
            .command
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

/// Expand `${VAR}` and `$VAR` references. A lone `$` is kept.
pub fn expand_env_vars(s: &str) -> SettingsResult<String> {
    let mut missing = None;
    let expanded = ENV_VAR.replace_all(s, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(SettingsError::MissingEnvVar(name)),
        None => Ok(expanded.into_owned()),
    }
}
