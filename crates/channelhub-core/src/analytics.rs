//! Cache-aside analytics retrieval with inline credential repair.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreError, ProviderError, Result};
use crate::integration::IntegrationService;
use crate::providers::{call_with_timeout, AnalyticsData};
use crate::refresh::TokenRefresher;
use crate::storage::CacheStore;

/// Cache key of one analytics range.
pub fn cache_key(org_id: &str, integration_id: &str, days: u32) -> String {
    format!("integration:{org_id}:{integration_id}:{days}")
}

enum Attempt {
    Done(Vec<AnalyticsData>),
    RefreshRequired,
}

pub struct AnalyticsRetriever {
    integrations: Arc<IntegrationService>,
    refresher: Arc<TokenRefresher>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
    refresh_wait: Duration,
    max_refresh_retries: u32,
    provider_timeout: Duration,
}

impl AnalyticsRetriever {
    pub fn new(
        integrations: Arc<IntegrationService>,
        refresher: Arc<TokenRefresher>,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
        refresh_wait: Duration,
        max_refresh_retries: u32,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            integrations,
            refresher,
            cache,
            cache_ttl,
            refresh_wait,
            max_refresh_retries,
            provider_timeout,
        }
    }

    /// Analytics of the last `days` days.
    ///
    /// An expired token (or `force_refresh`) is refreshed first; if that
    /// fails the channel is disconnected and the result is empty. When the
    /// provider still rejects the token, the whole read is retried without
    /// forcing, at most `max_refresh_retries` times.
    ///
    /// Any other provider failure is logged and yields an empty, uncached
    /// result.
    ///
    /// # Errors
    /// `NotFound` for an unknown integration; `RefreshRequired` once the
    /// retries are spent.
    pub async fn get_analytics(
        &self,
        org_id: &str,
        integration_id: &str,
        days: u32,
        force_refresh: bool,
    ) -> Result<Vec<AnalyticsData>> {
        let mut force = force_refresh;
        let mut retries = 0;
        loop {
            match self.attempt(org_id, integration_id, days, force).await? {
                Attempt::Done(data) => return Ok(data),
                Attempt::RefreshRequired if retries < self.max_refresh_retries => {
                    retries += 1;
                    force = false;
                    tracing::info!(org = %org_id, id = %integration_id, retries, "provider asked for a refresh, retrying");
                }
                Attempt::RefreshRequired => {
                    return Err(ProviderError::RefreshRequired.into());
                }
            }
        }
    }

    async fn attempt(
        &self,
        org_id: &str,
        integration_id: &str,
        days: u32,
        force_refresh: bool,
    ) -> Result<Attempt> {
        let mut integration = self.integrations.get(org_id, integration_id).await?;
        if !integration.is_social() {
            return Ok(Attempt::Done(Vec::new()));
        }

        let provider = self
            .integrations
            .providers()
            .get(&integration.provider_identifier)
            .ok_or_else(|| CoreError::not_found("provider", &integration.provider_identifier))?;

        if force_refresh || integration.is_token_expired(Utc::now()) {
            let refresh_token = integration.refresh_token.as_deref().unwrap_or_default();
            match self.refresher.refresh_one(provider.as_ref(), refresh_token).await {
                Some(tokens) => {
                    integration = self
                        .integrations
                        .connect_or_update(integration.with_tokens(&tokens))
                        .await?;
                    if provider.refresh_wait() {
                        tracing::debug!(provider = %provider.identifier(), wait = ?self.refresh_wait, "waiting for rotated token to settle");
                        tokio::time::sleep(self.refresh_wait).await;
                    }
                }
                None => {
                    self.integrations.disconnect(org_id, integration_id).await?;
                    return Ok(Attempt::Done(Vec::new()));
                }
            }
        }

        let key = cache_key(org_id, integration_id, days);
        if let Some(bytes) = self.cache.get(&key).await? {
            match serde_json::from_slice(&bytes) {
                Ok(data) => return Ok(Attempt::Done(data)),
                Err(e) => tracing::warn!(key = %key, error = %e, "discarding unreadable cache entry"),
            }
        }

        let Some(analytics) = provider.analytics() else {
            return Ok(Attempt::Done(Vec::new()));
        };
        let fetched = call_with_timeout(
            self.provider_timeout,
            analytics.analytics(&integration.internal_id, &integration.token, days),
        )
        .await;

        match fetched {
            Ok(data) => {
                let bytes = serde_json::to_vec(&data)?;
                if let Err(e) = self.cache.set(&key, bytes, self.cache_ttl).await {
                    tracing::warn!(key = %key, error = %e, "failed to cache analytics");
                }
                Ok(Attempt::Done(data))
            }
            Err(ProviderError::RefreshRequired) => Ok(Attempt::RefreshRequired),
            Err(e) => {
                tracing::warn!(org = %org_id, id = %integration_id, days, error = %e, "analytics fetch failed, returning empty");
                Ok(Attempt::Done(Vec::new()))
            }
        }
    }
}
