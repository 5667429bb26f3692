use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::StoreError;
use crate::integration::{ConnectIntegration, Integration, PageInformation, PostingTime};
use crate::plugs::{Plug, PlugParams};

/// Repository over integration and plug records plus the plug dedup ledger.
///
/// Every lookup is scoped to an organization and ignores soft-deleted
/// integrations unless stated otherwise.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Insert or update by (organization, provider, internal id).
    async fn upsert_integration(&self, req: &ConnectIntegration)
        -> Result<Integration, StoreError>;

    async fn get_integration(
        &self,
        org_id: &str,
        id: &str,
    ) -> Result<Option<Integration>, StoreError>;

    /// Live integrations of an organization, oldest first.
    async fn list_integrations(&self, org_id: &str) -> Result<Vec<Integration>, StoreError>;

    /// Write the identity resolved during finalize and clear
    /// `in_between_steps`. Returns `false`, writing nothing, unless the
    /// integration is live and still between steps.
    async fn finalize_identity(
        &self,
        org_id: &str,
        id: &str,
        page: &PageInformation,
    ) -> Result<bool, StoreError>;

    /// Free `internal_id` from soft-deleted integrations of the organization
    /// so a live integration can take it over. Returns how many were touched.
    async fn release_deleted_identity(
        &self,
        org_id: &str,
        internal_id: &str,
    ) -> Result<u64, StoreError>;

    async fn set_disabled(&self, org_id: &str, id: &str, disabled: bool)
        -> Result<bool, StoreError>;

    async fn soft_delete(&self, org_id: &str, id: &str) -> Result<bool, StoreError>;

    /// Drop credentials and flag the integration for reconnection.
    async fn clear_credentials(&self, org_id: &str, id: &str) -> Result<bool, StoreError>;

    async fn mark_refresh_needed(&self, org_id: &str, id: &str) -> Result<bool, StoreError>;

    /// Integrations whose token expires at or before `horizon` and that can
    /// still be refreshed, in stable store order.
    async fn needs_refresh(&self, horizon: DateTime<Utc>)
        -> Result<Vec<Integration>, StoreError>;

    async fn update_name_and_picture(
        &self,
        org_id: &str,
        id: &str,
        name: &str,
        picture: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn set_posting_times(
        &self,
        org_id: &str,
        id: &str,
        times: &[PostingTime],
    ) -> Result<bool, StoreError>;

    /// Create the plug activated, or replace only its parameters.
    async fn upsert_plug(
        &self,
        org_id: &str,
        integration_id: &str,
        method_name: &str,
        data: &PlugParams,
    ) -> Result<Plug, StoreError>;

    async fn list_plugs(&self, org_id: &str, integration_id: &str)
        -> Result<Vec<Plug>, StoreError>;

    async fn set_plug_activation(
        &self,
        org_id: &str,
        plug_id: &str,
        activated: bool,
    ) -> Result<Option<Plug>, StoreError>;

    /// Subset of `ids` already recorded for (method, integration).
    async fn filter_external_ids_seen(
        &self,
        method_name: &str,
        integration_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>, StoreError>;

    /// Append `ids` to the ledger. Already recorded ids are left untouched.
    async fn record_external_ids_seen(
        &self,
        method_name: &str,
        integration_id: &str,
        ids: &[String],
    ) -> Result<(), StoreError>;
}

/// Shared key/value cache with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<bool, StoreError>;
}
