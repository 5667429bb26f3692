//! # Channelhub Core Library
//!
//! Integration lifecycle and plug orchestration for social channels
//! connected by an organization. The CLI binary and any HTTP layer are thin
//! shells over the same services.
//!
//! ## Architecture
//!
//! - **Integrations**: connect, finalize, enable/disable, disconnect and
//!   soft-delete connected accounts
//! - **Refresh**: periodic sweep rotating OAuth credentials before they expire
//! - **Analytics**: cache-aside reads with inline credential repair
//! - **Plugs**: recurring per-integration jobs on a delay queue, with a dedup
//!   ledger of the external items they touched
//! - **Storage**: SQLite repository and cache, TOML configuration
//!
//! ## Key Components
//!
//! - [`Engine`]: builds every service from a [`Config`]
//! - [`IntegrationService`]: integration state transitions
//! - [`TokenRefresher`]: refresh sweep
//! - [`AnalyticsRetriever`]: analytics reads
//! - [`PlugScheduler`] / [`PlugWorker`]: plug activation and execution
//! - [`SocialProvider`]: capability contract implemented per platform

pub mod analytics;
pub mod engine;
pub mod error;
pub mod integration;
pub mod media;
pub mod notify;
pub mod plugs;
pub mod providers;
pub mod refresh;
pub mod storage;

pub use analytics::AnalyticsRetriever;
pub use engine::{Collaborators, Engine};
pub use error::{ConfigError, CoreError, ProviderError, QueueError, StoreError};
pub use integration::{
    ConnectIntegration, Integration, IntegrationService, IntegrationType, PageInformation,
    PostingTime, RefreshedTokens,
};
pub use media::{MediaStorage, PassthroughStorage};
pub use notify::{Notification, Notifier, TracingNotifier};
pub use plugs::{
    DelayQueue, JobQueue, Plug, PlugDescriptor, PlugJob, PlugParam, PlugParams, PlugRunOutcome,
    PlugScheduler, PlugSettings, PlugWorker,
};
pub use providers::{
    AnalyticsCapability, AnalyticsData, AnalyticsPoint, DedupLedger, PageResolver,
    ProviderRegistry, SocialProvider, TokenResponse,
};
pub use refresh::{SweepReport, TokenRefresher};
pub use storage::{
    CacheStore, Config, Environment, IntegrationStore, SqliteCache, SqliteJobQueue, SqliteStore,
};
