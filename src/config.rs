use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub pool: PoolConfig,
    pub renderer: RendererConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationsConfig,
}

/// Poll-loop and check pipeline knobs. The wait/settle durations are tuning
/// values, not correctness requirements, so they are all configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How often the scheduler wakes up to look for due items.
    pub tick_interval_secs: u64,
    /// Minimum age of an item's last check before it is due again.
    pub poll_interval_secs: u64,
    /// Per-item delay applied before each request, to avoid bursting a host.
    pub pacing_delay_secs: u64,
    /// Verdicts for the same normalized URL are reused within this window.
    pub cache_duration_secs: u64,
    /// Hard deadline for navigation plus DOM-interactive readiness.
    pub page_load_timeout_secs: u64,
    /// Short wait after the page is interactive, before querying the control.
    pub settle_wait_ms: u64,
    /// Consecutive check errors before a single degraded notification.
    pub error_threshold: u32,
    /// Upper bound on concurrently running checks.
    pub worker_count: usize,
    /// Hosts that may be watched; AddItem rejects everything else.
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub size: usize,
    pub acquire_timeout_secs: u64,
    /// Sessions are discarded and replaced after this many leases.
    pub recycle_after_leases: u32,
    pub create_retry_attempts: usize,
    pub create_retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    pub chrome_path: Option<String>,
    pub user_agent: String,
    /// Loading images and remote fonts is disabled by default; checks only
    /// need the add-to-cart control.
    pub load_images: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn poll_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.poll_interval_secs as i64)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_secs(self.pacing_delay_secs)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn settle_wait(&self) -> Duration {
        Duration::from_millis(self.settle_wait_ms)
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "SHELFWATCH_"
            .add_source(Environment::with_prefix("SHELFWATCH").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.renderer.chrome_path.is_none() {
            config.renderer.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.tick_interval_secs == 0 {
            return Err(ConfigError::Message(
                "monitor.tick_interval_secs must be greater than 0".into(),
            ));
        }

        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "monitor.poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.monitor.page_load_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "monitor.page_load_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.monitor.error_threshold == 0 {
            return Err(ConfigError::Message(
                "monitor.error_threshold must be greater than 0".into(),
            ));
        }

        if self.monitor.worker_count == 0 {
            return Err(ConfigError::Message(
                "monitor.worker_count must be greater than 0".into(),
            ));
        }

        if self.monitor.allowed_domains.is_empty() {
            return Err(ConfigError::Message(
                "monitor.allowed_domains must list at least one host".into(),
            ));
        }

        if self.pool.size == 0 {
            return Err(ConfigError::Message("pool.size must be greater than 0".into()));
        }

        if self.pool.recycle_after_leases == 0 {
            return Err(ConfigError::Message(
                "pool.recycle_after_leases must be greater than 0".into(),
            ));
        }

        if self.storage.data_file.is_empty() {
            return Err(ConfigError::Message("storage.data_file must not be empty".into()));
        }

        if let Some(webhook_url) = &self.notifications.discord.webhook_url {
            if !webhook_url.starts_with("https://discord.com/api/webhooks/") {
                return Err(ConfigError::Message(
                    "notifications.discord.webhook_url must be a Discord webhook URL".into(),
                ));
            }
        }

        Ok(())
    }
}
