//! Connected external accounts and their lifecycle.
//!
//! An [`Integration`] starts pending (`in_between_steps`) right after the
//! OAuth redirect, is finalized once the provider resolved the page/account,
//! and from then on is refreshed, disabled, flagged or soft-deleted through
//! [`IntegrationService`].

pub mod lifecycle;

pub use lifecycle::IntegrationService;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of channel an integration publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationType {
    Social,
    Article,
}

impl IntegrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Social => "social",
            IntegrationType::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "social" => Some(IntegrationType::Social),
            "article" => Some(IntegrationType::Article),
            _ => None,
        }
    }
}

/// A preferred posting slot, in minutes after midnight UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingTime {
    pub time: u32,
}

/// Slots assigned to a freshly connected channel.
pub fn default_posting_times() -> Vec<PostingTime> {
    vec![
        PostingTime { time: 120 },
        PostingTime { time: 400 },
        PostingTime { time: 700 },
    ]
}

/// One connected external account belonging to an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub picture: Option<String>,
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    pub provider_identifier: String,
    /// Platform-side account or page id.
    pub internal_id: String,
    pub token: String,
    pub refresh_token: Option<String>,
    pub token_expiration: Option<DateTime<Utc>>,
    pub profile: Option<String>,
    pub disabled: bool,
    /// Mid-OAuth-handshake: waiting for the page/account selection step.
    pub in_between_steps: bool,
    /// The last refresh attempt failed; the user has to reconnect.
    pub refresh_needed: bool,
    pub posting_times: Vec<PostingTime>,
    pub custom_instance_details: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// A missing expiration never counts as expired.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiration.is_some_and(|exp| exp < now)
    }

    pub fn is_social(&self) -> bool {
        self.integration_type == IntegrationType::Social
    }

    /// Upsert request that re-persists this integration with new credentials,
    /// leaving every other field as it is.
    pub fn with_tokens(&self, tokens: &RefreshedTokens) -> ConnectIntegration {
        ConnectIntegration {
            organization_id: self.organization_id.clone(),
            name: self.name.clone(),
            picture: self.picture.clone(),
            integration_type: self.integration_type,
            internal_id: self.internal_id.clone(),
            provider_identifier: self.provider_identifier.clone(),
            token: tokens.access_token.clone(),
            refresh_token: Some(tokens.refresh_token.clone()),
            expires_in: Some(tokens.expires_in),
            profile: self.profile.clone(),
            in_between_steps: self.in_between_steps,
            custom_instance_details: self.custom_instance_details.clone(),
        }
    }
}

/// Upsert request keyed by (organization, provider, internal id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectIntegration {
    pub organization_id: String,
    pub name: String,
    pub picture: Option<String>,
    pub integration_type: IntegrationType,
    pub internal_id: String,
    pub provider_identifier: String,
    pub token: String,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: Option<i64>,
    pub profile: Option<String>,
    pub in_between_steps: bool,
    pub custom_instance_details: Option<String>,
}

impl ConnectIntegration {
    /// `now + expires_in`. A lifetime too large to represent is treated as
    /// no expiration.
    pub fn token_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.and_then(|secs| expires_at(now, secs))
    }
}

/// `now + secs`, or `None` past year 9999, where stored timestamps stop
/// sorting chronologically.
pub fn expires_at(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs)
        .and_then(|d| now.checked_add_signed(d))
        .filter(|at| at.year() <= 9999)
}

/// Identity of a page/account resolved by a provider during finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInformation {
    pub id: String,
    pub name: String,
    pub access_token: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Complete credential triple returned by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}
