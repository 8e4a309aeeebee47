use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use url::Url;

use crate::checker::StockChecker;
use crate::config::AppConfig;
use crate::detector::TransitionDetector;
use crate::models::WatchedItem;
use crate::notify::Notifier;
use crate::pool::RenderSessionPool;
use crate::scheduler::MonitorScheduler;
use crate::session::{SelectorProfile, SessionFactory};
use crate::store::ItemStore;
use crate::utils::error::{AppError, Result};

/// The monitoring engine: owns the registry, the session pool, and the check
/// pipeline, and exposes the command surface a chat front end calls.
pub struct StockMonitor {
    store: Arc<ItemStore>,
    scheduler: MonitorScheduler,
    allowed_domains: Vec<String>,
}

impl StockMonitor {
    pub fn new(
        config: AppConfig,
        factory: Arc<dyn SessionFactory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let store = Arc::new(ItemStore::load(&config.storage.data_file));
        let pool = Arc::new(RenderSessionPool::new(factory, config.pool.clone()));
        let checker = Arc::new(StockChecker::new(&config.monitor, SelectorProfile::default()));
        let detector = Arc::new(TransitionDetector::new(
            Arc::clone(&store),
            config.monitor.error_threshold,
        ));

        let scheduler = MonitorScheduler::new(
            Arc::clone(&store),
            pool,
            checker,
            detector,
            notifier,
            config.monitor.clone(),
        );

        Self {
            store,
            scheduler,
            allowed_domains: config.monitor.allowed_domains,
        }
    }

    /// Registers a product URL for monitoring. The host must match the
    /// configured allow-list; anything else is rejected here, synchronously.
    pub async fn add_item(&self, raw_url: &str) -> Result<WatchedItem> {
        let url = Url::parse(raw_url)
            .map_err(|e| AppError::Validation(format!("invalid URL '{}': {}", raw_url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| AppError::Validation(format!("URL '{}' has no host", raw_url)))?;

        if !self.host_allowed(host) {
            return Err(AppError::DisallowedDomain {
                host: host.to_string(),
            });
        }

        let item = self.store.add(WatchedItem::from_url(&url)).await?;
        info!(item_id = %item.id, url = %item.url, "Watching new item");
        Ok(item)
    }

    /// Stops monitoring an item. Removing an unknown id is a no-op.
    pub async fn remove_item(&self, id: &str) -> Result<bool> {
        let removed = self.store.remove(id).await?;
        if removed {
            info!(item_id = %id, "Stopped watching item");
        }
        Ok(removed)
    }

    pub async fn list_items(&self) -> Vec<WatchedItem> {
        self.store.list().await
    }

    pub async fn get_item(&self, id: &str) -> Result<WatchedItem> {
        self.store.get(id).await
    }

    /// Runs the poll loop until shutdown is signalled or a fatal error
    /// (persistence failure, degraded pool) stops the engine.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.scheduler.run(shutdown).await
    }

    fn host_allowed(&self, host: &str) -> bool {
        self.allowed_domains.iter().any(|domain| {
            host.eq_ignore_ascii_case(domain)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
        })
    }
}
