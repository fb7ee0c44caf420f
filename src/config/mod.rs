//! Configuration system (layered: defaults < config file < env < code).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SqlTalkError;
use crate::generate::FewShotExample;
use crate::models::LanguageModel;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Tunable settings, as they appear in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// SQLite database file the gateway opens.
    pub database: PathBuf,
    /// Model in `provider:model-id` form.
    pub model: String,
    pub temperature: f64,
    /// Hard cap on tool calls within a single turn.
    pub max_tool_calls: usize,
    pub model_timeout_secs: u64,
    /// Attempts per model call, including the first.
    pub max_attempts: u32,
    /// Reject anything but single read-only statements in `sql_query`.
    pub read_only: bool,
    pub system_instruction: Option<String>,
    /// Worked question/SQL pairs for one-shot generation.
    pub examples: Vec<FewShotExample>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("music_store.db"),
            model: LanguageModel::default().to_string(),
            temperature: 0.0,
            max_tool_calls: 10,
            model_timeout_secs: 120,
            max_attempts: 3,
            read_only: false,
            system_instruction: None,
            examples: Vec::new(),
        }
    }
}

/// Layered configuration for sqltalk.
///
/// API keys and base URLs are keyed by provider name (`google`, `openai`).
#[derive(Clone)]
pub struct SqlTalkConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    settings: Settings,
}

impl fmt::Debug for SqlTalkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = read_map(&self.api_keys).keys().cloned().collect();
        f.debug_struct("SqlTalkConfig")
            .field("api_keys_for", &providers)
            .field("base_urls", &self.base_urls)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for SqlTalkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlTalkConfig {
    /// Create a config holding only built-in defaults.
    pub fn new() -> Self {
        Self {
            api_keys: Arc::new(RwLock::new(HashMap::new())),
            base_urls: Arc::new(RwLock::new(HashMap::new())),
            settings: Settings::default(),
        }
    }

    /// Load defaults, then the config file, then the environment.
    ///
    /// With no explicit path the per-user config directory is consulted; a
    /// missing file is fine, a malformed one is not.
    pub fn load(path: Option<&Path>) -> Result<Self, SqlTalkError> {
        let mut config = Self::new();
        let file = path.map(Path::to_path_buf).or_else(default_config_path);
        if let Some(file) = file {
            if file.exists() {
                config.settings = Settings::from_file(&file)?;
                tracing::debug!(path = %file.display(), "loaded config file");
            } else if path.is_some() {
                return Err(SqlTalkError::Configuration(format!(
                    "config file not found: {}",
                    file.display()
                )));
            }
        }
        let _ = dotenvy::dotenv();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load from environment variables only (defaults + env).
    pub fn from_env() -> Result<Self, SqlTalkError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::new();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overlay environment values read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SqlTalkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_mappings = [
            ("GOOGLE_API_KEY", "google"),
            ("GEMINI_API_KEY", "google"),
            ("GOOGLE_GEMINI_API_KEY", "google"),
            ("OPENAI_API_KEY", "openai"),
        ];
        for (env_var, provider) in &key_mappings {
            if let Some(key) = lookup(env_var).filter(|k| !k.is_empty()) {
                self.set_api_key(provider, key);
            }
        }

        let url_mappings = [("GOOGLE_BASE_URL", "google"), ("OPENAI_BASE_URL", "openai")];
        for (env_var, provider) in &url_mappings {
            if let Some(url) = lookup(env_var).filter(|u| !u.is_empty()) {
                self.set_base_url(provider, url);
            }
        }

        if let Some(database) = lookup("SQLTALK_DATABASE") {
            self.settings.database = PathBuf::from(database);
        }
        if let Some(model) = lookup("SQLTALK_MODEL") {
            self.settings.model = model;
        }
        if let Some(raw) = lookup("SQLTALK_MAX_TOOL_CALLS") {
            self.settings.max_tool_calls = raw
                .trim()
                .parse()
                .ok()
                .filter(|max: &usize| *max > 0)
                .ok_or_else(|| {
                    SqlTalkError::Configuration(format!(
                        "SQLTALK_MAX_TOOL_CALLS must be a positive integer, got '{raw}'"
                    ))
                })?;
        }
        if let Some(raw) = lookup("SQLTALK_READ_ONLY") {
            self.settings.read_only = parse_flag(&raw).ok_or_else(|| {
                SqlTalkError::Configuration(format!(
                    "SQLTALK_READ_ONLY must be true/false, got '{raw}'"
                ))
            })?;
        }
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Parse the configured model string.
    pub fn model(&self) -> Result<LanguageModel, SqlTalkError> {
        self.settings.model.parse()
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.model_timeout_secs)
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        write_map(&self.api_keys).insert(provider.to_string(), key);
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        read_map(&self.api_keys).get(provider).cloned()
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        write_map(&self.base_urls).insert(provider.to_string(), url);
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        read_map(&self.base_urls).get(provider).cloned()
    }

    /// Check if a provider has credentials configured.
    pub fn has_credentials(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }
}

impl Settings {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, SqlTalkError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw).map_err(|err| match err {
            SqlTalkError::Configuration(msg) => {
                SqlTalkError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, SqlTalkError> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| SqlTalkError::Configuration(e.to_string()))?;
        if settings.max_tool_calls == 0 {
            return Err(SqlTalkError::Configuration(
                "max_tool_calls must be at least 1".into(),
            ));
        }
        if settings.max_attempts == 0 {
            return Err(SqlTalkError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(settings)
    }
}

/// `<config dir>/sqltalk/config.toml`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sqltalk")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_map(
    map: &RwLock<HashMap<String, String>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
    map.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_map(
    map: &RwLock<HashMap<String, String>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
    map.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
