//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use channelhub_core::error::{CoreError, ProviderError};
use channelhub_core::integration::{
    ConnectIntegration, Integration, IntegrationType, PageInformation,
};
use channelhub_core::plugs::PlugDescriptor;
use channelhub_core::providers::{
    AnalyticsCapability, AnalyticsData, AnalyticsPoint, DedupLedger, PageResolver,
    ProviderRegistry, SocialProvider, TokenResponse,
};
use channelhub_core::storage::{Config, Environment, MemoryCache, SqliteStore};
use channelhub_core::{Collaborators, DelayQueue, Engine, Notification, Notifier, PassthroughStorage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ORG: &str = "org-1";
pub const PROVIDER: &str = "fake";
pub const REPOST: &str = "autoRepostPost";
pub const FAILING: &str = "failingPlug";

const PLUGS: &[PlugDescriptor] = &[
    PlugDescriptor {
        method_name: REPOST,
        title: "Auto Repost Posts",
        run_every_milliseconds: 3_600_000,
    },
    PlugDescriptor {
        method_name: FAILING,
        title: "Always fails",
        run_every_milliseconds: 60_000,
    },
];

// ============================================================================
// Recording notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CoreError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

// ============================================================================
// Fake provider
// ============================================================================

/// Scripted answer of one analytics call.
#[derive(Debug, Clone, Copy)]
pub enum AnalyticsStep {
    Data,
    RefreshRequired,
    Fail,
}

/// Provider whose refresh outcome depends on the refresh token it is given:
/// `bad-*` fails, `partial-*` returns an incomplete triple, `huge-*` returns
/// a lifetime no calendar can hold, `slow-*` never answers, anything else
/// succeeds.
pub struct FakeProvider {
    pub refresh_wait: bool,
    pub with_analytics: bool,
    refresh_calls: AtomicUsize,
    analytics_calls: AtomicUsize,
    plug_calls: AtomicUsize,
    events: Mutex<Vec<&'static str>>,
    analytics_script: Mutex<VecDeque<AnalyticsStep>>,
    candidates: Mutex<Vec<String>>,
    last_new: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            refresh_wait: false,
            with_analytics: true,
            refresh_calls: AtomicUsize::new(0),
            analytics_calls: AtomicUsize::new(0),
            plug_calls: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            analytics_script: Mutex::new(VecDeque::new()),
            candidates: Mutex::new(Vec::new()),
            last_new: Mutex::new(Vec::new()),
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn analytics_calls(&self) -> usize {
        self.analytics_calls.load(Ordering::SeqCst)
    }

    pub fn plug_calls(&self) -> usize {
        self.plug_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    /// Queue analytics answers; once exhausted every call returns data.
    pub fn script_analytics(&self, steps: &[AnalyticsStep]) {
        self.analytics_script.lock().unwrap().extend(steps.iter().copied());
    }

    /// External ids the repost plug "discovers" on its next runs.
    pub fn set_candidates(&self, ids: &[&str]) {
        *self.candidates.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    /// Ids the last plug run found new after consulting the ledger.
    pub fn last_new(&self) -> Vec<String> {
        self.last_new.lock().unwrap().clone()
    }
}

pub fn sample_analytics() -> Vec<AnalyticsData> {
    vec![AnalyticsData {
        label: "Impressions".into(),
        data: vec![
            AnalyticsPoint {
                total: "12".into(),
                date: "2024-05-01".into(),
            },
            AnalyticsPoint {
                total: "30".into(),
                date: "2024-05-02".into(),
            },
        ],
        percentage_change: 150.0,
    }]
}

#[async_trait]
impl AnalyticsCapability for FakeProvider {
    async fn analytics(
        &self,
        _internal_id: &str,
        _token: &str,
        _days: u32,
    ) -> Result<Vec<AnalyticsData>, ProviderError> {
        self.analytics_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push("analytics");
        let step = self
            .analytics_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AnalyticsStep::Data);
        match step {
            AnalyticsStep::Data => Ok(sample_analytics()),
            AnalyticsStep::RefreshRequired => Err(ProviderError::RefreshRequired),
            AnalyticsStep::Fail => Err(ProviderError::Api("rate limited".into())),
        }
    }
}

#[async_trait]
impl PageResolver for FakeProvider {
    async fn fetch_page_information(
        &self,
        _token: &str,
        callback: &serde_json::Value,
    ) -> Result<PageInformation, ProviderError> {
        // Let a concurrent finalize interleave here.
        tokio::task::yield_now().await;
        serde_json::from_value(callback.clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl SocialProvider for FakeProvider {
    fn identifier(&self) -> &str {
        PROVIDER
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.lock().unwrap().push("refresh");

        if refresh_token.starts_with("bad") {
            return Err(ProviderError::Api("invalid_grant".into()));
        }
        if refresh_token.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if refresh_token.starts_with("huge") {
            return Ok(TokenResponse {
                access_token: Some(format!("access-{n}")),
                refresh_token: Some(format!("refresh-{n}")),
                expires_in: Some(i64::MAX / 10),
            });
        }
        if refresh_token.starts_with("partial") {
            return Ok(TokenResponse {
                access_token: Some(format!("access-{n}")),
                refresh_token: None,
                expires_in: Some(3600),
            });
        }
        Ok(TokenResponse {
            access_token: Some(format!("access-{n}")),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in: Some(3600),
        })
    }

    fn refresh_wait(&self) -> bool {
        self.refresh_wait
    }

    fn analytics(&self) -> Option<&dyn AnalyticsCapability> {
        if self.with_analytics {
            Some(self)
        } else {
            None
        }
    }

    fn page_resolver(&self) -> Option<&dyn PageResolver> {
        Some(self)
    }

    fn plugs(&self) -> &[PlugDescriptor] {
        PLUGS
    }

    async fn run_plug(
        &self,
        method_name: &str,
        integration: &Integration,
        _params: &HashMap<String, String>,
        dedup: &dyn DedupLedger,
    ) -> Result<Vec<String>, ProviderError> {
        self.plug_calls.fetch_add(1, Ordering::SeqCst);
        match method_name {
            REPOST => {
                let candidates = self.candidates.lock().unwrap().clone();
                let new = dedup
                    .filter_new(method_name, &integration.id, &candidates)
                    .await?;
                *self.last_new.lock().unwrap() = new;
                Ok(candidates)
            }
            FAILING => Err(ProviderError::Api("platform down".into())),
            other => Err(ProviderError::Unsupported {
                provider: PROVIDER.into(),
                capability: other.into(),
            }),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub cache: Arc<MemoryCache>,
    pub queue: Arc<DelayQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub provider: Arc<FakeProvider>,
    pub engine: Engine,
}

pub fn test_config() -> Config {
    Config {
        environment: Environment::Production,
        ..Config::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), FakeProvider::new())
}

pub fn harness_with(config: Config, provider: FakeProvider) -> Harness {
    let store = Arc::new(SqliteStore::open_memory().unwrap());
    let cache = Arc::new(MemoryCache::new());
    let queue = Arc::new(DelayQueue::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let provider = Arc::new(provider);

    let engine = Engine::new(
        config,
        Collaborators {
            store: store.clone(),
            cache: cache.clone(),
            queue: queue.clone(),
            providers: ProviderRegistry::new().with(provider.clone()),
            notifier: notifier.clone(),
            media: Arc::new(PassthroughStorage),
        },
    );

    Harness {
        store,
        cache,
        queue,
        notifier,
        provider,
        engine,
    }
}

pub fn connect_request(internal_id: &str, refresh_token: &str, expires_in: i64) -> ConnectIntegration {
    ConnectIntegration {
        organization_id: ORG.into(),
        name: format!("Account {internal_id}"),
        picture: Some(format!("https://cdn.example.com/{internal_id}.png")),
        integration_type: IntegrationType::Social,
        internal_id: internal_id.into(),
        provider_identifier: PROVIDER.into(),
        token: format!("token-{internal_id}"),
        refresh_token: Some(refresh_token.into()),
        expires_in: Some(expires_in),
        profile: Some("someone".into()),
        in_between_steps: false,
        custom_instance_details: None,
    }
}

impl Harness {
    pub async fn connect(&self, internal_id: &str, refresh_token: &str, expires_in: i64) -> Integration {
        self.engine
            .integrations
            .connect_or_update(connect_request(internal_id, refresh_token, expires_in))
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: &str) -> Integration {
        self.engine.integrations.get(ORG, id).await.unwrap()
    }
}
