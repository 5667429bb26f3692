//! Wiring of every service from one [`Config`].

use std::sync::Arc;

use crate::analytics::AnalyticsRetriever;
use crate::error::Result;
use crate::integration::IntegrationService;
use crate::media::{MediaStorage, PassthroughStorage};
use crate::notify::Notifier;
use crate::plugs::{JobQueue, PlugScheduler, PlugWorker};
use crate::providers::ProviderRegistry;
use crate::refresh::TokenRefresher;
use crate::storage::{
    CacheStore, Config, IntegrationStore, SqliteCache, SqliteJobQueue, SqliteStore,
};

/// External collaborators the engine is built over.
pub struct Collaborators {
    pub store: Arc<dyn IntegrationStore>,
    pub cache: Arc<dyn CacheStore>,
    pub queue: Arc<dyn JobQueue>,
    pub providers: ProviderRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub media: Arc<dyn MediaStorage>,
}

pub struct Engine {
    pub config: Config,
    pub queue: Arc<dyn JobQueue>,
    pub integrations: Arc<IntegrationService>,
    pub refresher: Arc<TokenRefresher>,
    pub analytics: Arc<AnalyticsRetriever>,
    pub plugs: Arc<PlugScheduler>,
    pub worker: Arc<PlugWorker>,
}

impl Engine {
    pub fn new(config: Config, parts: Collaborators) -> Self {
        let providers = Arc::new(parts.providers);
        let timeout = config.provider_timeout();

        let integrations = Arc::new(IntegrationService::new(
            Arc::clone(&parts.store),
            Arc::clone(&providers),
            parts.notifier,
            parts.media,
            config.frontend_url.clone(),
            timeout,
        ));
        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&integrations),
            config.refresh_lookahead(),
            config.refresh.continue_on_failure,
            timeout,
        ));
        let analytics = Arc::new(AnalyticsRetriever::new(
            Arc::clone(&integrations),
            Arc::clone(&refresher),
            parts.cache,
            config.analytics_cache_ttl(),
            config.refresh_wait(),
            config.analytics.max_refresh_retries,
            timeout,
        ));
        let plugs = Arc::new(PlugScheduler::new(
            parts.store,
            providers,
            parts.queue.clone(),
            timeout,
        ));
        let worker = Arc::new(PlugWorker::new(
            Arc::clone(&plugs),
            Arc::clone(&parts.queue),
            config.plugs.batch_size,
            config.plug_poll_interval(),
        ));

        Self {
            config,
            queue: parts.queue,
            integrations,
            refresher,
            analytics,
            plugs,
            worker,
        }
    }

    /// Engine over the SQLite database named by the config. The analytics
    /// cache and the plug job queue share the database file, so every
    /// process opened on it sees the same pending jobs.
    pub fn open(
        config: Config,
        providers: ProviderRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let db_path = config.database_path()?;
        let store = SqliteStore::open(&db_path)?;
        let cache = SqliteCache::open(&db_path)?;
        let queue = SqliteJobQueue::open(&db_path)?;
        tracing::debug!(db = %db_path.display(), "engine opened");

        Ok(Self::new(
            config,
            Collaborators {
                store: Arc::new(store),
                cache: Arc::new(cache),
                queue: Arc::new(queue),
                providers,
                notifier,
                media: Arc::new(PassthroughStorage),
            },
        ))
    }
}
