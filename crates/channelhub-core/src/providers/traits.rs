use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ProviderError, StoreError};
use crate::integration::{expires_at, Integration, PageInformation, RefreshedTokens};
use crate::plugs::PlugDescriptor;

/// Raw answer of a provider's refresh call. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// The credential triple, or `None` when any part is missing or empty,
    /// or when `expires_in` is not a positive lifetime [`expires_at`] can
    /// place.
    pub fn into_complete(self) -> Option<RefreshedTokens> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let refresh_token = self.refresh_token.filter(|t| !t.is_empty())?;
        let expires_in = self
            .expires_in
            .filter(|secs| *secs > 0 && expires_at(Utc::now(), *secs).is_some())?;
        Some(RefreshedTokens {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}

/// One value of an analytics series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsPoint {
    pub total: String,
    pub date: String,
}

/// A labelled analytics series as returned by a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub label: String,
    pub data: Vec<AnalyticsPoint>,
    #[serde(default)]
    pub percentage_change: f64,
}

#[async_trait]
pub trait AnalyticsCapability: Send + Sync {
    /// Fetch `days` days of analytics. Returns [`ProviderError::RefreshRequired`]
    /// when the platform rejects a token that has not expired yet.
    async fn analytics(
        &self,
        internal_id: &str,
        token: &str,
        days: u32,
    ) -> Result<Vec<AnalyticsData>, ProviderError>;
}

#[async_trait]
pub trait PageResolver: Send + Sync {
    /// Resolve the page/account picked by the user during the OAuth callback.
    async fn fetch_page_information(
        &self,
        token: &str,
        callback: &serde_json::Value,
    ) -> Result<PageInformation, ProviderError>;
}

/// Dedup callback handed to plug methods.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// The ids of `candidates` not yet recorded for (method, integration).
    async fn filter_new(
        &self,
        method_name: &str,
        integration_id: &str,
        candidates: &[String],
    ) -> Result<Vec<String>, StoreError>;
}

/// Capability contract implemented per social platform.
#[async_trait]
pub trait SocialProvider: Send + Sync {
    /// Registry key, e.g. "facebook", "linkedin-page".
    fn identifier(&self) -> &str;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError>;

    /// Whether analytics must wait for a rotated token to settle.
    fn refresh_wait(&self) -> bool {
        false
    }

    fn analytics(&self) -> Option<&dyn AnalyticsCapability> {
        None
    }

    fn page_resolver(&self) -> Option<&dyn PageResolver> {
        None
    }

    /// Static plug methods this provider offers.
    fn plugs(&self) -> &[PlugDescriptor] {
        &[]
    }

    /// Run the plug method `method_name`. Returns every external id the run
    /// looked at.
    async fn run_plug(
        &self,
        method_name: &str,
        _integration: &Integration,
        _params: &HashMap<String, String>,
        _dedup: &dyn DedupLedger,
    ) -> Result<Vec<String>, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: self.identifier().to_string(),
            capability: format!("plug '{method_name}'"),
        })
    }
}
