use std::sync::Arc;

use tracing::debug;

use crate::models::{CheckResult, DegradedEvent, StockEvent, StockState, WatchedItem};
use crate::store::ItemStore;
use crate::utils::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub item: WatchedItem,
    pub stock_event: Option<StockEvent>,
    pub degraded_event: Option<DegradedEvent>,
}

/// Pure transition ruling: folds one check result into an item and decides
/// which notifications, if any, are due.
///
/// A stock event fires only on a transition between the two confident states.
/// The first confident observation after UNKNOWN updates state silently, so a
/// fresh process never raises a false restock alert. A check error never
/// touches the confident state; it only bumps the error counter, raising a
/// single degraded event when the counter reaches the threshold.
pub fn evaluate(item: &WatchedItem, result: &CheckResult, error_threshold: u32) -> TransitionOutcome {
    let mut updated = item.clone();
    updated.last_checked_at = Some(result.observed_at);

    match result.state {
        StockState::CheckError => {
            updated.consecutive_error_count = item.consecutive_error_count.saturating_add(1);

            let degraded_event = (updated.consecutive_error_count == error_threshold).then(|| {
                DegradedEvent {
                    item_id: item.id.clone(),
                    display_name: item.display_name.clone(),
                    url: item.url.clone(),
                    consecutive_errors: updated.consecutive_error_count,
                    last_error: result.error.clone(),
                    occurred_at: result.observed_at,
                }
            });

            TransitionOutcome {
                item: updated,
                stock_event: None,
                degraded_event,
            }
        }
        StockState::InStock | StockState::OutOfStock => {
            updated.consecutive_error_count = 0;

            if result.state == item.last_state {
                return TransitionOutcome {
                    item: updated,
                    stock_event: None,
                    degraded_event: None,
                };
            }

            updated.last_state = result.state;
            updated.last_changed_at = Some(result.observed_at);

            // Both endpoints must be confident for an event to fire.
            let stock_event = item.last_state.is_confident().then(|| StockEvent {
                item_id: item.id.clone(),
                display_name: item.display_name.clone(),
                url: item.url.clone(),
                from_state: item.last_state,
                to_state: result.state,
                occurred_at: result.observed_at,
            });

            TransitionOutcome {
                item: updated,
                stock_event,
                degraded_event: None,
            }
        }
        StockState::Unknown => {
            debug!(item_id = %item.id, "Ignoring unknown verdict");
            TransitionOutcome {
                item: updated,
                stock_event: None,
                degraded_event: None,
            }
        }
    }
}

/// Applies check results against the durable registry. The persisted
/// `last_state` is compared before any event is raised, which makes
/// notification delivery idempotent: replaying the same observation after a
/// restart produces no duplicate event.
pub struct TransitionDetector {
    store: Arc<ItemStore>,
    error_threshold: u32,
}

impl TransitionDetector {
    pub fn new(store: Arc<ItemStore>, error_threshold: u32) -> Self {
        Self {
            store,
            error_threshold,
        }
    }

    pub async fn apply(&self, result: &CheckResult) -> Result<TransitionOutcome> {
        let item = self.store.get(&result.item_id).await?;
        let outcome = evaluate(&item, result, self.error_threshold);

        let persisted = self
            .store
            .apply_check_result(&item.id, outcome.item.clone())
            .await?;

        // The store discards stale results; their events must not fire.
        if persisted != outcome.item {
            return Ok(TransitionOutcome {
                item: persisted,
                stock_event: None,
                degraded_event: None,
            });
        }

        Ok(outcome)
    }
}
