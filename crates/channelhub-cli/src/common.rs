//! Shared setup for commands that need the engine.

use std::sync::Arc;

use channelhub_core::providers::registry_from_config;
use channelhub_core::{Config, Engine, Integration, TracingNotifier};
use serde_json::json;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Engine over the configured database, with one OAuth provider per
/// `[[providers.oauth]]` entry.
pub fn open_engine() -> Result<Engine, Box<dyn std::error::Error>> {
    open_engine_with(Config::load()?)
}

pub fn open_engine_with(config: Config) -> Result<Engine, Box<dyn std::error::Error>> {
    let providers = registry_from_config(&config.providers.oauth, config.provider_timeout())?;
    tracing::debug!(providers = ?providers.identifiers(), "providers loaded");
    Ok(Engine::open(config, providers, Arc::new(TracingNotifier))?)
}

/// Integration fields safe to print. Credentials are left out.
pub fn integration_summary(i: &Integration) -> serde_json::Value {
    json!({
        "id": i.id,
        "name": i.name,
        "provider": i.provider_identifier,
        "internalId": i.internal_id,
        "disabled": i.disabled,
        "refreshNeeded": i.refresh_needed,
        "inBetweenSteps": i.in_between_steps,
        "tokenExpiration": i.token_expiration,
    })
}
