use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::queue::{Job, JobOptions, JobQueue};
use super::{job_key, Plug, PlugJob, PlugSettings, PLUGS_CHANNEL};
use crate::error::{CoreError, Result, StoreError};
use crate::integration::Integration;
use crate::providers::{call_with_timeout, DedupLedger, ProviderRegistry};
use crate::storage::IntegrationStore;

/// What [`PlugScheduler::run_plug`] did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlugRunOutcome {
    /// The provider method ran and `recorded` ids went into the ledger.
    Ran { recorded: usize },
    IntegrationMissing,
    PlugMissing,
    PlugDeactivated,
    ProviderMissing,
}

impl PlugRunOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, PlugRunOutcome::Ran { .. })
    }
}

/// Dedup ledger over the store, handed to provider plug methods.
#[derive(Clone)]
pub struct SeenItems {
    store: Arc<dyn IntegrationStore>,
}

impl SeenItems {
    pub fn new(store: Arc<dyn IntegrationStore>) -> Self {
        Self { store }
    }

    /// `candidates` minus every id already recorded for (method,
    /// integration), keeping candidate order.
    pub async fn filter_new(
        &self,
        method_name: &str,
        integration_id: &str,
        candidates: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let seen: HashSet<String> = self
            .store
            .filter_external_ids_seen(method_name, integration_id, candidates)
            .await?
            .into_iter()
            .collect();
        Ok(candidates
            .iter()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect())
    }

    /// Append `ids` to the ledger.
    pub async fn record_seen(
        &self,
        method_name: &str,
        integration_id: &str,
        ids: &[String],
    ) -> Result<(), StoreError> {
        self.store
            .record_external_ids_seen(method_name, integration_id, ids)
            .await
    }
}

#[async_trait]
impl DedupLedger for SeenItems {
    async fn filter_new(
        &self,
        method_name: &str,
        integration_id: &str,
        candidates: &[String],
    ) -> Result<Vec<String>, StoreError> {
        SeenItems::filter_new(self, method_name, integration_id, candidates).await
    }
}

/// Registers and fires recurring plug jobs.
pub struct PlugScheduler {
    store: Arc<dyn IntegrationStore>,
    providers: Arc<ProviderRegistry>,
    queue: Arc<dyn JobQueue>,
    seen: SeenItems,
    provider_timeout: Duration,
}

impl PlugScheduler {
    pub fn new(
        store: Arc<dyn IntegrationStore>,
        providers: Arc<ProviderRegistry>,
        queue: Arc<dyn JobQueue>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            seen: SeenItems::new(Arc::clone(&store)),
            store,
            providers,
            queue,
            provider_timeout,
        }
    }

    pub fn seen_items(&self) -> &SeenItems {
        &self.seen
    }

    async fn integration(&self, org_id: &str, integration_id: &str) -> Result<Integration> {
        self.store
            .get_integration(org_id, integration_id)
            .await?
            .ok_or_else(|| CoreError::not_found("integration", integration_id))
    }

    /// Store the plug settings and schedule the plug when it is activated.
    ///
    /// # Errors
    /// `NotFound` when the integration does not exist or its provider has no
    /// plug named `settings.func`.
    pub async fn create_or_update_plug(
        &self,
        org_id: &str,
        integration_id: &str,
        settings: &PlugSettings,
    ) -> Result<Plug> {
        let integration = self.integration(org_id, integration_id).await?;
        if self
            .providers
            .find_plug(&integration.provider_identifier, &settings.func)
            .is_none()
        {
            return Err(CoreError::not_found("plug method", &settings.func));
        }

        let plug = self
            .store
            .upsert_plug(org_id, integration_id, &settings.func, &settings.fields)
            .await?;
        if plug.activated {
            self.activate(org_id, integration_id, &settings.func).await?;
        }
        Ok(plug)
    }

    pub async fn change_activation(&self, org_id: &str, plug_id: &str, activated: bool) -> Result<Plug> {
        let plug = self
            .store
            .set_plug_activation(org_id, plug_id, activated)
            .await?
            .ok_or_else(|| CoreError::not_found("plug", plug_id))?;

        if activated {
            self.activate(org_id, &plug.integration_id, &plug.method_name).await?;
        } else {
            self.deactivate(org_id, &plug.integration_id, &plug.method_name).await?;
        }
        Ok(plug)
    }

    /// Emit the recurring job for (integration, method). Re-activating an
    /// active plug replaces its pending job.
    pub async fn activate(&self, org_id: &str, integration_id: &str, method_name: &str) -> Result<()> {
        let integration = self.integration(org_id, integration_id).await?;
        let descriptor = self
            .providers
            .find_plug(&integration.provider_identifier, method_name)
            .ok_or_else(|| CoreError::not_found("plug method", method_name))?;

        let payload = PlugJob {
            retry: 1,
            delay: descriptor.run_every_milliseconds,
            org_id: org_id.to_string(),
            integration_id: integration_id.to_string(),
            func_name: method_name.to_string(),
        };
        let job = Job {
            id: payload.key(),
            options: JobOptions { delay: 0 },
            payload: serde_json::to_value(&payload)?,
        };
        self.queue.emit(PLUGS_CHANNEL, job).await?;
        tracing::info!(
            org = %org_id,
            integration = %integration_id,
            method = %method_name,
            every_ms = descriptor.run_every_milliseconds,
            "plug activated"
        );
        Ok(())
    }

    /// Delete the job for (integration, method). Deleting a job that is not
    /// queued is not an error.
    pub async fn deactivate(&self, org_id: &str, integration_id: &str, method_name: &str) -> Result<()> {
        self.queue
            .delete(PLUGS_CHANNEL, &job_key(integration_id, method_name))
            .await?;
        tracing::info!(org = %org_id, integration = %integration_id, method = %method_name, "plug deactivated");
        Ok(())
    }

    pub async fn list_plugs(&self, org_id: &str, integration_id: &str) -> Result<Vec<Plug>> {
        Ok(self.store.list_plugs(org_id, integration_id).await?)
    }

    /// Fire one plug job: run the provider method with the plug parameters
    /// and the dedup ledger, then record every id it returned.
    ///
    /// A missing integration returns without touching the provider or the
    /// ledger.
    pub async fn run_plug(&self, job: &PlugJob) -> Result<PlugRunOutcome> {
        let Some(integration) = self
            .store
            .get_integration(&job.org_id, &job.integration_id)
            .await?
        else {
            tracing::debug!(key = %job.key(), "integration gone, dropping plug job");
            return Ok(PlugRunOutcome::IntegrationMissing);
        };

        let plug = self
            .store
            .list_plugs(&job.org_id, &job.integration_id)
            .await?
            .into_iter()
            .find(|p| p.method_name == job.func_name);
        let plug = match plug {
            Some(plug) if plug.activated => plug,
            Some(_) => {
                tracing::debug!(key = %job.key(), "plug deactivated, skipping");
                return Ok(PlugRunOutcome::PlugDeactivated);
            }
            None => {
                tracing::warn!(key = %job.key(), "plug record missing, skipping");
                return Ok(PlugRunOutcome::PlugMissing);
            }
        };

        let Some(provider) = self.providers.get(&integration.provider_identifier) else {
            tracing::warn!(key = %job.key(), provider = %integration.provider_identifier, "no provider registered");
            return Ok(PlugRunOutcome::ProviderMissing);
        };

        let params = plug.data.to_map();
        let ids = call_with_timeout(
            self.provider_timeout,
            provider.run_plug(&job.func_name, &integration, &params, &self.seen),
        )
        .await?;

        self.seen
            .record_seen(&job.func_name, &job.integration_id, &ids)
            .await?;
        tracing::debug!(key = %job.key(), recorded = ids.len(), "plug run finished");
        Ok(PlugRunOutcome::Ran {
            recorded: ids.len(),
        })
    }
}
