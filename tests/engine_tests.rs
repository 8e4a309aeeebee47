// End-to-end tests for the monitoring engine: command surface, scheduler,
// transition detection, and persistence working together against scripted
// render sessions and a collecting notifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use shelfwatch::config::{
    AppConfig, DiscordConfig, MonitorConfig, NotificationsConfig, PoolConfig, RendererConfig,
    StorageConfig,
};
use shelfwatch::models::{DegradedEvent, StockEvent, StockState};
use shelfwatch::monitor::StockMonitor;
use shelfwatch::notify::Notifier;
use shelfwatch::session::{ControlProbe, RenderSession, SelectorProfile, SessionFactory};
use shelfwatch::Result;

/// Session whose verdict is flipped from the outside mid-test.
struct SwitchableSession {
    probe: Arc<Mutex<ControlProbe>>,
}

#[async_trait]
impl RenderSession for SwitchableSession {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn query_control(&mut self, _profile: &SelectorProfile) -> Result<ControlProbe> {
        Ok(*self.probe.lock().await)
    }
}

struct SwitchableFactory {
    probe: Arc<Mutex<ControlProbe>>,
}

impl SwitchableFactory {
    fn new(initial: ControlProbe) -> (Arc<Self>, Arc<Mutex<ControlProbe>>) {
        let probe = Arc::new(Mutex::new(initial));
        (
            Arc::new(Self {
                probe: Arc::clone(&probe),
            }),
            probe,
        )
    }
}

#[async_trait]
impl SessionFactory for SwitchableFactory {
    async fn create(&self) -> Result<Box<dyn RenderSession>> {
        Ok(Box::new(SwitchableSession {
            probe: Arc::clone(&self.probe),
        }))
    }
}

#[derive(Default)]
struct CollectingNotifier {
    stock_events: Mutex<Vec<StockEvent>>,
    degraded_events: Mutex<Vec<DegradedEvent>>,
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify_stock(&self, event: &StockEvent) -> Result<()> {
        self.stock_events.lock().await.push(event.clone());
        Ok(())
    }

    async fn notify_degraded(&self, event: &DegradedEvent) -> Result<()> {
        self.degraded_events.lock().await.push(event.clone());
        Ok(())
    }
}

fn test_config(data_file: &std::path::Path) -> AppConfig {
    AppConfig {
        monitor: MonitorConfig {
            tick_interval_secs: 1,
            poll_interval_secs: 2,
            pacing_delay_secs: 0,
            cache_duration_secs: 0, // Every poll observes the live page
            page_load_timeout_secs: 5,
            settle_wait_ms: 0,
            error_threshold: 3,
            worker_count: 2,
            allowed_domains: vec!["popmart.com".to_string()],
        },
        pool: PoolConfig {
            size: 2,
            acquire_timeout_secs: 1,
            recycle_after_leases: 50,
            create_retry_attempts: 1,
            create_retry_base_delay_ms: 1,
        },
        renderer: RendererConfig {
            chrome_path: None,
            user_agent: "ShelfwatchTest/0.1".to_string(),
            load_images: false,
        },
        storage: StorageConfig {
            data_file: data_file.to_string_lossy().to_string(),
        },
        notifications: NotificationsConfig {
            discord: DiscordConfig {
                webhook_url: None,
                username: "Shelfwatch".to_string(),
                avatar_url: None,
            },
        },
    }
}

const PRODUCT_URL: &str = "https://www.popmart.com/us/products/675/test-figure";

async fn run_engine_for(monitor: &StockMonitor, virtual_secs: u64) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = monitor.run(shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => panic!("engine stopped early: {:?}", result),
        _ = tokio::time::sleep(Duration::from_secs(virtual_secs)) => {}
    }

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_restock_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("items.json");

    let (factory, probe) = SwitchableFactory::new(ControlProbe {
        present: true,
        enabled: true,
    });
    let notifier = Arc::new(CollectingNotifier::default());

    let monitor = StockMonitor::new(
        test_config(&data_file),
        factory as Arc<dyn SessionFactory>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );

    let added = monitor.add_item(PRODUCT_URL).await.unwrap();
    assert_eq!(added.id, "675");
    assert_eq!(added.last_state, StockState::Unknown);

    // First confident observation: state persisted, no event.
    run_engine_for(&monitor, 5).await;
    assert_eq!(
        monitor.get_item("675").await.unwrap().last_state,
        StockState::InStock
    );
    assert!(notifier.stock_events.lock().await.is_empty());

    // Page flips to sold out: exactly one event.
    *probe.lock().await = ControlProbe {
        present: true,
        enabled: false,
    };
    run_engine_for(&monitor, 5).await;

    let events = notifier.stock_events.lock().await.clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].from_state, StockState::InStock);
    assert_eq!(events[0].to_state, StockState::OutOfStock);
    assert_eq!(events[0].item_id, "675");

    // Staying sold out fires nothing further.
    run_engine_for(&monitor, 10).await;
    assert_eq!(notifier.stock_events.lock().await.len(), 1);

    // Restock: one more event, in the other direction.
    *probe.lock().await = ControlProbe {
        present: true,
        enabled: true,
    };
    run_engine_for(&monitor, 5).await;

    let events = notifier.stock_events.lock().await.clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].from_state, StockState::OutOfStock);
    assert_eq!(events[1].to_state, StockState::InStock);
}

#[tokio::test(start_paused = true)]
async fn test_state_survives_restart_without_duplicate_events() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("items.json");

    let (factory, _probe) = SwitchableFactory::new(ControlProbe {
        present: true,
        enabled: true,
    });
    let notifier = Arc::new(CollectingNotifier::default());

    {
        let monitor = StockMonitor::new(
            test_config(&data_file),
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        );
        monitor.add_item(PRODUCT_URL).await.unwrap();
        run_engine_for(&monitor, 5).await;
        assert_eq!(
            monitor.get_item("675").await.unwrap().last_state,
            StockState::InStock
        );
    }

    // A fresh process sees the persisted registry and re-observes the same
    // state without raising a false restock alert.
    let monitor = StockMonitor::new(
        test_config(&data_file),
        factory as Arc<dyn SessionFactory>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );

    let items = monitor.list_items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].last_state, StockState::InStock);

    run_engine_for(&monitor, 10).await;
    assert!(notifier.stock_events.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_watch_list_mutations_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("items.json");

    let (factory, _probe) = SwitchableFactory::new(ControlProbe {
        present: true,
        enabled: true,
    });
    let notifier = Arc::new(CollectingNotifier::default());

    let monitor = StockMonitor::new(
        test_config(&data_file),
        factory as Arc<dyn SessionFactory>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );

    monitor.add_item(PRODUCT_URL).await.unwrap();
    monitor
        .add_item("https://www.popmart.com/us/products/900/other-figure")
        .await
        .unwrap();

    run_engine_for(&monitor, 5).await;

    assert!(monitor.remove_item("675").await.unwrap());
    run_engine_for(&monitor, 5).await;

    let remaining = monitor.list_items().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "900");
    assert_eq!(remaining[0].last_state, StockState::InStock);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_page_raises_single_degraded_notice() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("items.json");

    struct FailingFactory;

    struct FailingSession;

    #[async_trait]
    impl RenderSession for FailingSession {
        async fn navigate(&mut self, _url: &str) -> Result<()> {
            Err(shelfwatch::AppError::Render("connection reset".to_string()))
        }

        async fn query_control(&mut self, _profile: &SelectorProfile) -> Result<ControlProbe> {
            Ok(ControlProbe::ABSENT)
        }
    }

    #[async_trait]
    impl SessionFactory for FailingFactory {
        async fn create(&self) -> Result<Box<dyn RenderSession>> {
            Ok(Box::new(FailingSession))
        }
    }

    let notifier = Arc::new(CollectingNotifier::default());
    let monitor = StockMonitor::new(
        test_config(&data_file),
        Arc::new(FailingFactory),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );

    monitor.add_item(PRODUCT_URL).await.unwrap();
    run_engine_for(&monitor, 30).await;

    let item = monitor.get_item("675").await.unwrap();
    assert_eq!(item.last_state, StockState::Unknown);
    assert!(item.consecutive_error_count >= 3);

    assert!(notifier.stock_events.lock().await.is_empty());
    assert_eq!(notifier.degraded_events.lock().await.len(), 1);
    assert_eq!(notifier.degraded_events.lock().await[0].consecutive_errors, 3);
}
