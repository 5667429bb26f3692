use std::sync::Arc;
use std::time::Duration;

use super::{ConnectIntegration, Integration, PostingTime};
use crate::error::{CoreError, ProviderError, Result};
use crate::media::MediaStorage;
use crate::notify::{Notification, Notifier};
use crate::providers::{call_with_timeout, ProviderRegistry};
use crate::storage::IntegrationStore;

/// State transitions of connected integrations.
pub struct IntegrationService {
    store: Arc<dyn IntegrationStore>,
    providers: Arc<ProviderRegistry>,
    notifier: Arc<dyn Notifier>,
    media: Arc<dyn MediaStorage>,
    frontend_url: String,
    provider_timeout: Duration,
}

impl IntegrationService {
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        providers: Arc<ProviderRegistry>,
        notifier: Arc<dyn Notifier>,
        media: Arc<dyn MediaStorage>,
        frontend_url: impl Into<String>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            providers,
            notifier,
            media,
            frontend_url: frontend_url.into(),
            provider_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn IntegrationStore> {
        &self.store
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Create the integration, or update the one with the same
    /// (organization, provider, internal id). A reconnect revives a deleted
    /// row and clears `refresh_needed`.
    pub async fn connect_or_update(&self, mut req: ConnectIntegration) -> Result<Integration> {
        if let Some(picture) = req.picture.take() {
            req.picture = Some(self.media.upload_simple(&picture).await?);
        }
        let integration = self.store.upsert_integration(&req).await?;
        tracing::info!(
            org = %integration.organization_id,
            id = %integration.id,
            provider = %integration.provider_identifier,
            pending = integration.in_between_steps,
            "integration connected"
        );
        Ok(integration)
    }

    pub async fn list(&self, org_id: &str) -> Result<Vec<Integration>> {
        Ok(self.store.list_integrations(org_id).await?)
    }

    pub async fn get(&self, org_id: &str, id: &str) -> Result<Integration> {
        self.store
            .get_integration(org_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("integration", id))
    }

    /// Complete a pending connection with the page/account the user picked.
    ///
    /// # Errors
    /// `InvalidState` unless the integration is still between steps.
    pub async fn finalize_connection(
        &self,
        org_id: &str,
        id: &str,
        provider_identifier: &str,
        callback: &serde_json::Value,
    ) -> Result<Integration> {
        let integration = self.get(org_id, id).await?;
        if !integration.in_between_steps {
            return Err(CoreError::InvalidState(format!(
                "integration {id} is not waiting for a page selection"
            )));
        }

        let provider = self
            .providers
            .get(provider_identifier)
            .ok_or_else(|| CoreError::not_found("provider", provider_identifier))?;
        let resolver = provider
            .page_resolver()
            .ok_or_else(|| ProviderError::Unsupported {
                provider: provider_identifier.to_string(),
                capability: "page resolution".into(),
            })?;
        let page = call_with_timeout(
            self.provider_timeout,
            resolver.fetch_page_information(&integration.token, callback),
        )
        .await?;

        self.check_for_deleted_once_and_update(org_id, &page.id).await?;
        if !self.store.finalize_identity(org_id, id, &page).await? {
            // Deleted meanwhile (NotFound) or finalized by a concurrent call.
            self.get(org_id, id).await?;
            return Err(CoreError::InvalidState(format!(
                "integration {id} was finalized concurrently"
            )));
        }
        tracing::info!(org = %org_id, id = %id, internal_id = %page.id, "integration finalized");
        self.get(org_id, id).await
    }

    /// Free `internal_id` from soft-deleted integrations of the organization
    /// so the finalizing integration can take it.
    pub async fn check_for_deleted_once_and_update(
        &self,
        org_id: &str,
        internal_id: &str,
    ) -> Result<u64> {
        let released = self.store.release_deleted_identity(org_id, internal_id).await?;
        if released > 0 {
            tracing::debug!(org = %org_id, internal_id, released, "released deleted identity");
        }
        Ok(released)
    }

    /// Drop credentials, flag for reconnection and tell the organization.
    pub async fn disconnect(&self, org_id: &str, id: &str) -> Result<()> {
        let integration = self.get(org_id, id).await?;
        self.store.clear_credentials(org_id, id).await?;
        tracing::warn!(
            org = %org_id,
            id = %id,
            provider = %integration.provider_identifier,
            "integration disconnected"
        );
        self.inform_about_refresh_error(&integration).await
    }

    pub(crate) async fn inform_about_refresh_error(&self, integration: &Integration) -> Result<()> {
        let provider = &integration.provider_identifier;
        self.notifier
            .notify(Notification {
                organization_id: integration.organization_id.clone(),
                title: format!("Could not refresh your {provider} channel"),
                body: format!(
                    "Could not refresh your {provider} channel. Please go back to the system \
                     and connect it again {}/launches",
                    self.frontend_url
                ),
                important: true,
            })
            .await
    }

    pub async fn mark_refresh_needed(&self, org_id: &str, id: &str) -> Result<()> {
        self.require(self.store.mark_refresh_needed(org_id, id).await?, id)
    }

    /// # Errors
    /// `QuotaExceeded` when the organization already has `channel_limit` or
    /// more enabled integrations.
    pub async fn enable(&self, org_id: &str, channel_limit: usize, id: &str) -> Result<()> {
        let active = self
            .store
            .list_integrations(org_id)
            .await?
            .iter()
            .filter(|i| !i.disabled)
            .count();
        if active >= channel_limit {
            return Err(CoreError::QuotaExceeded {
                limit: channel_limit,
            });
        }
        self.require(self.store.set_disabled(org_id, id, false).await?, id)
    }

    pub async fn disable(&self, org_id: &str, id: &str) -> Result<()> {
        self.require(self.store.set_disabled(org_id, id, true).await?, id)
    }

    pub async fn delete(&self, org_id: &str, id: &str) -> Result<()> {
        self.require(self.store.soft_delete(org_id, id).await?, id)?;
        tracing::info!(org = %org_id, id = %id, "integration deleted");
        Ok(())
    }

    pub async fn update_name_and_picture(
        &self,
        org_id: &str,
        id: &str,
        name: &str,
        picture: Option<&str>,
    ) -> Result<()> {
        let picture = match picture {
            Some(p) => Some(self.media.upload_simple(p).await?),
            None => None,
        };
        let updated = self
            .store
            .update_name_and_picture(org_id, id, name, picture.as_deref())
            .await?;
        self.require(updated, id)
    }

    pub async fn set_posting_times(
        &self,
        org_id: &str,
        id: &str,
        times: &[PostingTime],
    ) -> Result<()> {
        if let Some(bad) = times.iter().find(|t| t.time >= 24 * 60) {
            return Err(CoreError::InvalidState(format!(
                "posting time {} is outside the day",
                bad.time
            )));
        }
        self.require(self.store.set_posting_times(org_id, id, times).await?, id)
    }

    /// Disable the newest enabled integrations so at most `channel_limit`
    /// stay enabled. Returns the ids that were disabled.
    pub async fn disable_over_quota(&self, org_id: &str, channel_limit: usize) -> Result<Vec<String>> {
        let over: Vec<String> = self
            .store
            .list_integrations(org_id)
            .await?
            .into_iter()
            .filter(|i| !i.disabled)
            .skip(channel_limit)
            .map(|i| i.id)
            .collect();
        for id in &over {
            self.store.set_disabled(org_id, id, true).await?;
        }
        if !over.is_empty() {
            tracing::info!(org = %org_id, disabled = over.len(), channel_limit, "disabled integrations over quota");
        }
        Ok(over)
    }

    fn require(&self, matched: bool, id: &str) -> Result<()> {
        if matched {
            Ok(())
        } else {
            Err(CoreError::not_found("integration", id))
        }
    }
}
