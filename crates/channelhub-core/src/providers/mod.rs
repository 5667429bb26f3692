//! Social platform capabilities and their registry.

pub mod oauth;
pub mod registry;
pub mod traits;

pub use oauth::{registry_from_config, OAuth2Provider, OAuth2Refresher};
pub use registry::ProviderRegistry;
pub use traits::{
    AnalyticsCapability, AnalyticsData, AnalyticsPoint, DedupLedger, PageResolver,
    SocialProvider, TokenResponse,
};

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// Run a provider call, turning an elapsed `limit` into
/// [`ProviderError::Timeout`].
pub async fn call_with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ProviderError::Timeout {
            secs: limit.as_secs(),
        })?
}
