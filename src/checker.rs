use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::models::{CheckResult, StockState, WatchedItem};
use crate::session::{RenderSession, SelectorProfile};

/// A verdict plus whether the session that produced it is still usable. A
/// timed-out or failed navigation leaves the session in an unknown state, so
/// the holder must release it unhealthy.
#[derive(Debug)]
pub struct CheckOutcome {
    pub result: CheckResult,
    pub session_healthy: bool,
}

struct CachedVerdict {
    state: StockState,
    observed: Instant,
}

/// Produces a stock verdict for one item using a leased render session.
///
/// Confident verdicts are cached by normalized URL for the configured window,
/// so duplicate URLs and short poll intervals do not re-render pages that
/// cannot have changed yet. Check errors are never replayed from cache.
pub struct StockChecker {
    profile: SelectorProfile,
    page_load_timeout: Duration,
    settle_wait: Duration,
    cache_duration: Duration,
    cache: Mutex<HashMap<String, CachedVerdict>>,
}

impl StockChecker {
    pub fn new(config: &MonitorConfig, profile: SelectorProfile) -> Self {
        Self {
            profile,
            page_load_timeout: config.page_load_timeout(),
            settle_wait: config.settle_wait(),
            cache_duration: config.cache_duration(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A still-fresh cached verdict for the item's URL, if any. Callers
    /// consult this before leasing a session so a cache hit never consumes
    /// pool capacity.
    pub async fn cached_verdict(&self, item: &WatchedItem) -> Option<CheckResult> {
        let state = self.cached_state(&item.url).await?;
        debug!(item_id = %item.id, state = %state, "Reusing cached verdict");
        Some(CheckResult::observed(&item.id, state))
    }

    pub async fn check(&self, item: &WatchedItem, session: &mut dyn RenderSession) -> CheckOutcome {
        if let Some(result) = self.cached_verdict(item).await {
            return CheckOutcome {
                result,
                session_healthy: true,
            };
        }

        match timeout(self.page_load_timeout, session.navigate(&item.url)).await {
            Err(_) => {
                // A timeout is a check error, never an out-of-stock verdict.
                return CheckOutcome {
                    result: CheckResult::failed(&item.id, "page load timed out"),
                    session_healthy: false,
                };
            }
            Ok(Err(e)) => {
                return CheckOutcome {
                    result: CheckResult::failed(&item.id, e.to_string()),
                    session_healthy: false,
                };
            }
            Ok(Ok(())) => {}
        }

        // Settle wait: the DOM is interactive but late scripts may still be
        // swapping the purchase control in.
        tokio::time::sleep(self.settle_wait).await;

        let probe = match session.query_control(&self.profile).await {
            Ok(probe) => probe,
            Err(e) => {
                return CheckOutcome {
                    result: CheckResult::failed(&item.id, e.to_string()),
                    session_healthy: false,
                };
            }
        };

        let state = if probe.present && probe.enabled {
            StockState::InStock
        } else {
            // Disabled control, or no control within the settle window.
            StockState::OutOfStock
        };

        self.cache.lock().await.insert(
            item.url.clone(),
            CachedVerdict {
                state,
                observed: Instant::now(),
            },
        );

        CheckOutcome {
            result: CheckResult::observed(&item.id, state),
            session_healthy: true,
        }
    }

    async fn cached_state(&self, url: &str) -> Option<StockState> {
        let mut cache = self.cache.lock().await;
        match cache.get(url) {
            Some(entry) if entry.observed.elapsed() < self.cache_duration => Some(entry.state),
            Some(_) => {
                cache.remove(url);
                None
            }
            None => None,
        }
    }
}
