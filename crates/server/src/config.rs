//! # Application Configuration
//!
//! This module defines the configuration structure for `devotio-server` and loads it
//! from a `config.yml` file and environment variables, layered in this order:
//!
//! 1. the main YAML file with `${VAR}` substitution,
//! 2. top-level environment variables (`PORT`, `DB_URL`, `JWT_SECRET`),
//! 3. `DEVOTIO_`-prefixed variables for nested keys
//!    (e.g. `DEVOTIO_GENERATION__STALE_AFTER_SECS`).
//!
//! Anything left unset falls back to the serde defaults below.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use devotio::{
    constants::{
        DEFAULT_DB_FILE, DEFAULT_KEEPALIVE, DEFAULT_MAX_INPUT_CHARS, DEFAULT_POLL_CEILING,
        DEFAULT_POLL_INTERVAL, DEFAULT_STALE_AFTER, DEFAULT_STARTING_BALANCE,
    },
    providers::ai::TokenRates,
    Pricing,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration;
use tracing::info;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
    /// Indicates a required configuration file was not found.
    NotFound(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::NotFound(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// The root configuration structure, mapping directly to `config.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The port for the server to listen on. Loaded from `PORT` env var.
    #[serde(default = "default_port")]
    pub port: u16,
    /// The path to the SQLite database file. Loaded from `DB_URL` env var.
    #[serde(default = "default_db_url")]
    pub db_url: String,
    /// The HMAC secret bearer tokens are signed with. Loaded from `JWT_SECRET` env var.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// A map of named, reusable AI provider configurations.
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_port() -> u16 {
    9090
}

fn default_db_url() -> String {
    DEFAULT_DB_FILE.to_string()
}

fn default_jwt_secret() -> String {
    "a-secure-secret-key".to_string()
}

/// A reusable configuration for a specific AI provider instance.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// The type of provider ("gemini" or "local").
    pub provider: String,
    /// The API URL. Optional for Gemini, where it is derived from the model name.
    pub api_url: Option<String>,
    /// The API key, which can be null for local providers.
    pub api_key: Option<String>,
    pub model_name: String,
    #[serde(default)]
    pub rates: TokenRates,
}

/// Who pays for guides without a recorded creator.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CreatorlessPolicyKind {
    #[default]
    Free,
    Bill,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Provider names in fallback order.
    #[serde(default)]
    pub provider_chain: Vec<String>,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_ceiling_secs")]
    pub poll_ceiling_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default)]
    pub creatorless: CreatorlessPolicyKind,
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_poll_ceiling_secs() -> u64 {
    DEFAULT_POLL_CEILING.as_secs()
}

fn default_keepalive_secs() -> u64 {
    DEFAULT_KEEPALIVE.as_secs()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider_chain: Vec::new(),
            stale_after_secs: default_stale_after_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_ceiling_secs: default_poll_ceiling_secs(),
            keepalive_secs: default_keepalive_secs(),
            creatorless: CreatorlessPolicyKind::default(),
        }
    }
}

impl GenerationConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.poll_ceiling_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: u64,
}

fn default_starting_balance() -> u64 {
    DEFAULT_STARTING_BALANCE
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
        }
    }
}

// Reads a file and substitutes `${VAR}` references from the environment.
// Returns Ok(None) if the file does not exist.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !std::path::Path::new(path).exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}")
        .map_err(|e| ConfigError::General(format!("Invalid substitution pattern: {e}")))?;
    let expanded_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps["var"];
        env::var(var_name).unwrap_or_default()
    });

    Ok(Some(expanded_content.to_string()))
}

/// Loads the application configuration from a file and environment variables.
///
/// Without an override, `config.yml` next to the crate manifest is used, falling back
/// to `config.{AI_PROVIDER}.yml` (default `local`).
pub fn get_config(config_path_override: Option<&str>) -> Result<AppConfig, ConfigError> {
    let base_path = env!("CARGO_MANIFEST_DIR");

    let main_config_path = if let Some(override_path) = config_path_override {
        override_path.to_string()
    } else {
        let user_config_path = format!("{base_path}/config.yml");
        if std::path::Path::new(&user_config_path).exists() {
            info!("Loading user-defined configuration from '{user_config_path}'.");
            user_config_path
        } else {
            let provider = env::var("AI_PROVIDER").unwrap_or_else(|_| "local".to_string());
            let fallback_path = format!("{base_path}/config.{provider}.yml");
            info!("'{user_config_path}' not found. Falling back to '{fallback_path}' based on AI_PROVIDER='{provider}'.");
            fallback_path
        }
    };

    let main_content = read_and_substitute(&main_config_path)?.ok_or_else(|| {
        ConfigError::NotFound(format!(
            "Main config file not found at '{main_config_path}'. Please ensure 'config.yml' exists or your AI_PROVIDER is set to load a valid template ('local' or 'gemini')."
        ))
    })?;

    let settings = ConfigBuilder::builder()
        .add_source(File::from_str(&main_content, FileFormat::Yaml))
        // Top-level keys like PORT and DB_URL.
        .add_source(Environment::default().try_parsing(true))
        // Nested overrides such as DEVOTIO_GENERATION__STALE_AFTER_SECS.
        .add_source(
            Environment::with_prefix("DEVOTIO")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    if config.generation.provider_chain.is_empty() {
        return Err(ConfigError::General(
            "generation.provider_chain must name at least one provider".to_string(),
        ));
    }
    for name in &config.generation.provider_chain {
        if !config.providers.contains_key(name) {
            return Err(ConfigError::General(format!(
                "generation.provider_chain names unknown provider '{name}'"
            )));
        }
    }
    Ok(config)
}
