//! Token refresh coordinator.
//!
//! A failed refresh is never an error at this boundary: [`TokenRefresher::refresh_one`]
//! yields `None` and the sweep flags the integration and notifies its
//! organization. By default the sweep stops at the first failure; set
//! `refresh.continue_on_failure` to process the rest of the batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::integration::{Integration, IntegrationService, RefreshedTokens};
use crate::providers::{call_with_timeout, SocialProvider};

/// Outcome of one [`TokenRefresher::refresh_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Integrations whose credentials were rotated, in processing order.
    pub refreshed: Vec<String>,
    /// Integrations flagged `refresh_needed` during this sweep.
    pub failed: Vec<String>,
    /// Integrations left untouched because the sweep stopped early.
    pub untouched: usize,
}

impl SweepReport {
    pub fn stopped_early(&self) -> bool {
        self.untouched > 0
    }
}

pub struct TokenRefresher {
    integrations: Arc<IntegrationService>,
    lookahead: chrono::Duration,
    continue_on_failure: bool,
    provider_timeout: Duration,
}

impl TokenRefresher {
    pub fn new(
        integrations: Arc<IntegrationService>,
        lookahead: chrono::Duration,
        continue_on_failure: bool,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            integrations,
            lookahead,
            continue_on_failure,
            provider_timeout,
        }
    }

    /// Ask `provider` for a new credential triple.
    ///
    /// Errors, timeouts and incomplete answers all come back as `None`.
    pub async fn refresh_one(
        &self,
        provider: &dyn SocialProvider,
        refresh_token: &str,
    ) -> Option<RefreshedTokens> {
        match call_with_timeout(self.provider_timeout, provider.refresh_token(refresh_token)).await {
            Ok(resp) => {
                let tokens = resp.into_complete();
                if tokens.is_none() {
                    tracing::warn!(provider = %provider.identifier(), "refresh returned an incomplete token set");
                }
                tokens
            }
            Err(e) => {
                tracing::warn!(provider = %provider.identifier(), error = %e, "refresh failed");
                None
            }
        }
    }

    /// Refresh `integration` and persist the result. `None` on failure,
    /// including an unregistered provider.
    pub async fn refresh_integration(&self, integration: &Integration) -> Result<Option<Integration>> {
        let Some(provider) = self
            .integrations
            .providers()
            .get(&integration.provider_identifier)
        else {
            tracing::warn!(
                id = %integration.id,
                provider = %integration.provider_identifier,
                "no provider registered"
            );
            return Ok(None);
        };

        let refresh_token = integration.refresh_token.as_deref().unwrap_or_default();
        let Some(tokens) = self.refresh_one(provider.as_ref(), refresh_token).await else {
            return Ok(None);
        };
        let updated = self
            .integrations
            .connect_or_update(integration.with_tokens(&tokens))
            .await?;
        Ok(Some(updated))
    }

    /// Sweep every integration whose token expires within the lookahead.
    pub async fn refresh_all(&self) -> Result<SweepReport> {
        let horizon = Utc::now()
            .checked_add_signed(self.lookahead)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let due = self.integrations.store().needs_refresh(horizon).await?;
        let total = due.len();
        let mut report = SweepReport::default();
        tracing::debug!(due = total, "refresh sweep started");

        for (idx, integration) in due.iter().enumerate() {
            match self.refresh_integration(integration).await? {
                Some(updated) => {
                    tracing::info!(
                        org = %updated.organization_id,
                        id = %updated.id,
                        expires = ?updated.token_expiration,
                        "token refreshed"
                    );
                    report.refreshed.push(updated.id);
                }
                None => {
                    self.integrations.inform_about_refresh_error(integration).await?;
                    self.integrations
                        .store()
                        .mark_refresh_needed(&integration.organization_id, &integration.id)
                        .await?;
                    tracing::warn!(
                        org = %integration.organization_id,
                        id = %integration.id,
                        provider = %integration.provider_identifier,
                        "token refresh failed, integration flagged"
                    );
                    report.failed.push(integration.id.clone());

                    if !self.continue_on_failure {
                        report.untouched = total - idx - 1;
                        break;
                    }
                }
            }
        }

        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            untouched = report.untouched,
            "refresh sweep finished"
        );
        Ok(report)
    }
}
