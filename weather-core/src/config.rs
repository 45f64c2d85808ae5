use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Environment variable names read by [`Config::load`].
pub mod env {
    pub const CONFIG_PATH: &str = "WEATHER_BOT_CONFIG";
    pub const BOT_TOKEN: &str = "TEL_API_KEY";
    pub const API_KEY: &str = "API_KEY";
    pub const API_URL: &str = "WEATHER_API_URL";
    pub const HTTP_TIMEOUT_SECS: &str = "HTTP_TIMEOUT_SECS";
    pub const DB_PATH: &str = "DB_PATH";
    pub const DB_NAME: &str = "DB_NAME";
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}.\nHint: export it or run `weather-bot configure`.")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to access config file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("Failed to serialize configuration to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine platform config directory")]
    NoConfigDir,
}

/// Telegram bot credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig").field("token", &redact(&self.token)).finish()
    }
}

/// WeatherAPI.com connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct WeatherApiConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl WeatherApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for WeatherApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeatherApiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_base_url() -> String {
    "http://api.weatherapi.com/v1".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

fn default_db_path() -> PathBuf {
    PathBuf::from("weather_bot.db")
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

/// Process configuration, assembled once at startup and handed to each component.
///
/// Example TOML:
/// ```toml
/// [telegram]
/// token = "..."
///
/// [weather]
/// api_key = "..."
/// timeout_secs = 10
///
/// [database]
/// path = "weather_bot.db"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub weather: WeatherApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    ///
    /// Nothing is validated here; entry points call [`validate`](Self::validate)
    /// or [`validate_weather`](Self::validate_weather) for what they need.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::load_file(&Self::resolve_path()?)?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }

    /// Read a config file, or return an empty default if it doesn't exist yet.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Override file values with whatever `lookup` returns for the known variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get(env::BOT_TOKEN) {
            self.telegram.token = token;
        }
        if let Some(key) = get(env::API_KEY) {
            self.weather.api_key = key;
        }
        if let Some(url) = get(env::API_URL) {
            self.weather.base_url = url;
        }
        if let Some(secs) = get(env::HTTP_TIMEOUT_SECS) {
            self.weather.timeout_secs = secs.parse().map_err(|e| ConfigError::Invalid {
                name: env::HTTP_TIMEOUT_SECS,
                reason: format!("'{secs}' is not a number of seconds: {e}"),
            })?;
        }
        if let Some(path) = get(env::DB_PATH) {
            self.database.path = PathBuf::from(path);
        } else if let Some(name) = get(env::DB_NAME) {
            self.database.path = PathBuf::from(format!("{name}.db"));
        }

        Ok(())
    }

    /// Missing credentials are fatal at startup rather than at the first request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.token.is_empty() {
            return Err(ConfigError::Missing(env::BOT_TOKEN));
        }
        self.validate_weather()
    }

    /// Only the provider settings, for entry points that never talk to the chat platform.
    pub fn validate_weather(&self) -> Result<(), ConfigError> {
        if self.weather.api_key.is_empty() {
            return Err(ConfigError::Missing(env::API_KEY));
        }
        if self.weather.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: env::HTTP_TIMEOUT_SECS,
                reason: "timeout must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Io { path: parent.to_path_buf(), source })?;
        }

        let toml = toml::to_string_pretty(self)?;

        fs::write(path, toml).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
    }

    /// `WEATHER_BOT_CONFIG` if set, the platform default otherwise.
    pub fn resolve_path() -> Result<PathBuf, ConfigError> {
        match std::env::var_os(env::CONFIG_PATH) {
            Some(p) => Ok(PathBuf::from(p)),
            None => Self::config_file_path(),
        }
    }

    /// Default path to the config file.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "weather-bot", "weather-bot")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}
