//! Configuration module for metrica.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, ClassificationSettings, LlmSettings, LoggingSettings, MappingSettings,
    OntologySettings, ServerSettings, Settings, SettingsError, SettingsResult, StoreBackend,
    StoreSettings,
};
