mod config;
pub mod cache;
pub mod database;
pub mod jobs;
pub mod migrations;
pub mod traits;

pub use cache::{MemoryCache, SqliteCache};
pub use config::{
    AnalyticsConfig, Config, Environment, OAuthProviderConfig, PlugsConfig, ProvidersConfig,
    RefreshConfig, StorageConfig,
};
pub use database::SqliteStore;
pub use jobs::SqliteJobQueue;
pub use traits::{CacheStore, IntegrationStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/channelhub[-dev]/` based on CHANNELHUB_ENV.
///
/// Set CHANNELHUB_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("CHANNELHUB_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("channelhub-dev")
    } else {
        base_dir.join("channelhub")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
