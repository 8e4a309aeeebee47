use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::checker::StockChecker;
use crate::config::MonitorConfig;
use crate::detector::TransitionDetector;
use crate::models::WatchedItem;
use crate::notify::Notifier;
use crate::pool::RenderSessionPool;
use crate::store::ItemStore;
use crate::utils::error::{AppError, Result};

/// Drives the poll loop across all watched items.
///
/// A fixed tick interval partitions time; each tick dispatches the items
/// whose last check is older than the poll interval. An in-flight set marks
/// items as checking so no item ever has two concurrent checks, and a worker
/// semaphore bounds how many checks run at once. One item's failures never
/// stall the others: every check runs in its own task and failures land in
/// that item's error counter, except fatal persistence or pool errors, which
/// stop the loop.
pub struct MonitorScheduler {
    store: Arc<ItemStore>,
    pool: Arc<RenderSessionPool>,
    checker: Arc<StockChecker>,
    detector: Arc<TransitionDetector>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    worker_slots: Arc<Semaphore>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<ItemStore>,
        pool: Arc<RenderSessionPool>,
        checker: Arc<StockChecker>,
        detector: Arc<TransitionDetector>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        let worker_slots = Arc::new(Semaphore::new(config.worker_count));
        Self {
            store,
            pool,
            checker,
            detector,
            notifier,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            worker_slots,
        }
    }

    /// Runs until the shutdown signal flips or a fatal error surfaces.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<AppError>(1);

        info!(
            tick_secs = self.config.tick_interval_secs,
            poll_secs = self.config.poll_interval_secs,
            "Monitor scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_due_items(&fatal_tx).await;
                }
                Some(fatal) = fatal_rx.recv() => {
                    error!("Stopping scheduler on fatal error: {}", fatal);
                    return Err(fatal);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Monitor scheduler shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch_due_items(&self, fatal_tx: &mpsc::Sender<AppError>) {
        let now = Utc::now();
        let poll_interval = self.config.poll_interval();

        for item in self.store.list().await {
            if !item.is_due(now, poll_interval) {
                continue;
            }

            // Refuse to re-dispatch until the previous check returns.
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(item.id.clone()) {
                    continue;
                }
            }

            self.spawn_check(item, fatal_tx.clone());
        }
    }

    fn spawn_check(&self, item: WatchedItem, fatal_tx: mpsc::Sender<AppError>) {
        let pool = Arc::clone(&self.pool);
        let checker = Arc::clone(&self.checker);
        let detector = Arc::clone(&self.detector);
        let notifier = Arc::clone(&self.notifier);
        let in_flight = Arc::clone(&self.in_flight);
        let worker_slots = Arc::clone(&self.worker_slots);
        let pacing_delay = self.config.pacing_delay();

        tokio::spawn(async move {
            let item_id = item.id.clone();

            let slot = worker_slots.acquire_owned().await;
            if slot.is_ok() {
                run_check(item, pool, checker, detector, notifier, pacing_delay, fatal_tx).await;
            }

            in_flight.lock().await.remove(&item_id);
        });
    }
}

async fn run_check(
    item: WatchedItem,
    pool: Arc<RenderSessionPool>,
    checker: Arc<StockChecker>,
    detector: Arc<TransitionDetector>,
    notifier: Arc<dyn Notifier>,
    pacing_delay: std::time::Duration,
    fatal_tx: mpsc::Sender<AppError>,
) {
    // Cached verdicts skip the pacing delay and the session lease: no page
    // is rendered, so no pool capacity is spent.
    let result = match checker.cached_verdict(&item).await {
        Some(result) => result,
        None => {
            // Per-item pacing: never burst requests at the host.
            tokio::time::sleep(pacing_delay).await;

            let mut lease = match pool.acquire().await {
                Ok(lease) => lease,
                Err(AppError::PoolExhausted { timeout_ms }) => {
                    // Deferred, not failed; the item becomes due again next
                    // interval.
                    debug!(item_id = %item.id, timeout_ms, "No session available, deferring check");
                    return;
                }
                Err(e) => {
                    if e.is_fatal() {
                        let _ = fatal_tx.send(e).await;
                    } else {
                        warn!(item_id = %item.id, "Failed to acquire render session: {}", e);
                    }
                    return;
                }
            };

            let outcome = checker.check(&item, lease.session_mut()).await;

            // The lease goes back before anything else; it is never held
            // across a notification dispatch.
            pool.release(lease, outcome.session_healthy).await;
            outcome.result
        }
    };

    let transition = match detector.apply(&result).await {
        Ok(transition) => transition,
        Err(e) if e.is_fatal() => {
            let _ = fatal_tx.send(e).await;
            return;
        }
        Err(e) => {
            // Typically the item was removed while its check was running.
            debug!(item_id = %item.id, "Check result not applied: {}", e);
            return;
        }
    };

    if let Some(event) = transition.stock_event {
        info!(item_id = %event.item_id, from = %event.from_state, to = %event.to_state,
              "Stock transition detected");
        if let Err(e) = notifier.notify_stock(&event).await {
            warn!(item_id = %event.item_id, "Stock notification failed: {}", e);
        }
    }

    if let Some(event) = transition.degraded_event {
        warn!(item_id = %event.item_id, errors = event.consecutive_errors,
              "Item monitoring degraded");
        if let Err(e) = notifier.notify_degraded(&event).await {
            warn!(item_id = %event.item_id, "Degraded notification failed: {}", e);
        }
    }
}
