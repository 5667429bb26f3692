//! TOML-based engine configuration.
//!
//! Stores:
//! - Deployment environment (drives the analytics cache TTL)
//! - Analytics cache and token settle settings
//! - Refresh sweep policy
//! - Plug worker polling
//! - Provider call timeout
//! - SQLite database location
//!
//! Configuration is stored at `~/.config/channelhub/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Read from CHANNELHUB_ENV ("dev" or "development" selects development).
    pub fn from_env() -> Self {
        match std::env::var("CHANNELHUB_ENV").as_deref() {
            Ok("dev") | Ok("development") => Environment::Development,
            _ => Environment::Production,
        }
    }
}

/// Analytics retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_dev_cache_ttl_secs")]
    pub dev_cache_ttl_secs: u64,
    /// Pause after a token rotation for providers that need settling time.
    #[serde(default = "default_refresh_wait_secs")]
    pub refresh_wait_secs: u64,
    /// Retries after a provider reports the token must be refreshed.
    #[serde(default = "default_max_refresh_retries")]
    pub max_refresh_retries: u32,
}

/// Refresh sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Tokens expiring within this many hours are refreshed by the sweep.
    #[serde(default = "default_lookahead_hours")]
    pub lookahead_hours: u64,
    /// Keep sweeping after a failed refresh instead of stopping the batch.
    #[serde(default)]
    pub continue_on_failure: bool,
}

/// Plug worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlugsConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// A platform reached through a plain OAuth2 refresh-token grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub identifier: String,
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Pause analytics after a token rotation.
    #[serde(default)]
    pub refresh_wait: bool,
}

/// Provider call configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub oauth: Vec<OAuthProviderConfig>,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `channelhub.db` in the data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/channelhub/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "Environment::from_env")]
    pub environment: Environment,
    /// Base URL used in reconnect notifications.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub plugs: PlugsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Upper bound of the refresh lookahead (100 years).
pub const MAX_LOOKAHEAD_HOURS: u64 = 100 * 365 * 24;

// Default functions
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_dev_cache_ttl_secs() -> u64 {
    1
}
fn default_refresh_wait_secs() -> u64 {
    10
}
fn default_max_refresh_retries() -> u32 {
    1
}
fn default_lookahead_hours() -> u64 {
    24
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_batch_size() -> usize {
    10
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_frontend_url() -> String {
    "http://localhost:4200".into()
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            dev_cache_ttl_secs: default_dev_cache_ttl_secs(),
            refresh_wait_secs: default_refresh_wait_secs(),
            max_refresh_retries: default_max_refresh_retries(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            lookahead_hours: default_lookahead_hours(),
            continue_on_failure: false,
        }
    }
}

impl Default for PlugsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            oauth: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::from_env(),
            frontend_url: default_frontend_url(),
            analytics: AnalyticsConfig::default(),
            refresh: RefreshConfig::default(),
            plugs: PlugsConfig::default(),
            providers: ProvidersConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => serde_json::Value::Number(
                        value
                            .parse::<u64>()
                            .map_err(|e| invalid(e.to_string()))?
                            .into(),
                    ),
                    // Optional paths are stored as null until set.
                    serde_json::Value::Null | serde_json::Value::String(_) => {
                        serde_json::Value::String(value.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if the file is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. Does not save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// into the field's type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// TTL of a cached analytics result.
    pub fn analytics_cache_ttl(&self) -> Duration {
        match self.environment {
            Environment::Development => Duration::from_secs(self.analytics.dev_cache_ttl_secs),
            Environment::Production => Duration::from_secs(self.analytics.cache_ttl_secs),
        }
    }

    pub fn refresh_wait(&self) -> Duration {
        Duration::from_secs(self.analytics.refresh_wait_secs)
    }

    /// Capped at [`MAX_LOOKAHEAD_HOURS`].
    pub fn refresh_lookahead(&self) -> chrono::Duration {
        i64::try_from(self.refresh.lookahead_hours.min(MAX_LOOKAHEAD_HOURS))
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.call_timeout_secs)
    }

    pub fn plug_poll_interval(&self) -> Duration {
        Duration::from_millis(self.plugs.poll_interval_ms)
    }

    /// Resolved SQLite database path.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("channelhub.db")),
        }
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production() -> Config {
        Config {
            environment: Environment::Production,
            ..Config::default()
        }
    }

    #[test]
    fn default_config_roundtrip() {
        let cfg = production();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.environment, Environment::Production);
        assert_eq!(parsed.analytics.cache_ttl_secs, 3600);
        assert!(!parsed.refresh.continue_on_failure);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let parsed: Config = toml::from_str("environment = \"development\"\n").unwrap();
        assert_eq!(parsed.environment, Environment::Development);
        assert_eq!(parsed.analytics.refresh_wait_secs, 10);
        assert_eq!(parsed.plugs.batch_size, 10);
        assert_eq!(parsed.providers.call_timeout_secs, 30);
    }

    #[test]
    fn cache_ttl_depends_on_environment() {
        let mut cfg = production();
        assert_eq!(cfg.analytics_cache_ttl(), Duration::from_secs(3600));
        cfg.environment = Environment::Development;
        assert_eq!(cfg.analytics_cache_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn huge_lookahead_saturates() {
        let mut cfg = production();
        assert_eq!(cfg.refresh_lookahead(), chrono::Duration::hours(24));
        cfg.set("refresh.lookahead_hours", &u64::MAX.to_string()).unwrap();
        assert_eq!(
            cfg.refresh_lookahead(),
            chrono::Duration::hours(i64::try_from(MAX_LOOKAHEAD_HOURS).unwrap())
        );
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = production();
        assert_eq!(cfg.get("analytics.refresh_wait_secs").as_deref(), Some("10"));
        assert_eq!(cfg.get("refresh.continue_on_failure").as_deref(), Some("false"));
        assert_eq!(cfg.get("environment").as_deref(), Some("production"));
        assert!(cfg.get("analytics.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_values() {
        let mut cfg = production();
        cfg.set("refresh.continue_on_failure", "true").unwrap();
        cfg.set("analytics.cache_ttl_secs", "60").unwrap();
        cfg.set("frontend_url", "https://app.example.com").unwrap();
        assert!(cfg.refresh.continue_on_failure);
        assert_eq!(cfg.analytics.cache_ttl_secs, 60);
        assert_eq!(cfg.frontend_url, "https://app.example.com");
    }

    #[test]
    fn oauth_providers_parse_from_toml() {
        let parsed: Config = toml::from_str(
            r#"
[providers]
call_timeout_secs = 5

[[providers.oauth]]
identifier = "linkedin-page"
token_url = "https://www.linkedin.com/oauth/v2/accessToken"
client_id = "abc"
refresh_wait = true
"#,
        )
        .unwrap();
        assert_eq!(parsed.provider_timeout(), Duration::from_secs(5));
        assert_eq!(parsed.providers.oauth.len(), 1);
        assert!(parsed.providers.oauth[0].refresh_wait);
        assert_eq!(parsed.providers.oauth[0].client_secret, "");
    }

    #[test]
    fn set_fills_optional_path() {
        let mut cfg = production();
        cfg.set("storage.database_path", "/tmp/ch.db").unwrap();
        assert_eq!(cfg.database_path().unwrap(), PathBuf::from("/tmp/ch.db"));
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = production();
        assert!(matches!(
            cfg.set("analytics.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_rejects_invalid_type() {
        let mut cfg = production();
        assert!(matches!(
            cfg.set("refresh.continue_on_failure", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(cfg.set("environment", "staging").is_err());
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.analytics.max_refresh_retries, 1);

        let mut changed = cfg.clone();
        changed.set("plugs.batch_size", "3").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().plugs.batch_size, 3);
    }

    #[test]
    fn unreadable_config_is_left_alone() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let bytes = b"environment = \"dev\"\n\xff\xfe".to_vec();
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::LoadFailed { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), bytes);

        // A directory in place of the file is not "missing" either.
        assert!(matches!(
            Config::load_from(temp_dir.path()),
            Err(ConfigError::LoadFailed { .. })
        ));
    }
}
