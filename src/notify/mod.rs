use async_trait::async_trait;
use tracing::info;

use crate::models::{DegradedEvent, StockEvent};
use crate::utils::error::Result;

pub mod discord;

pub use discord::DiscordNotifier;

/// Sink the engine pushes events to. Delivery failures are the caller's to
/// log; the engine never retries synchronously and never crashes on them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_stock(&self, event: &StockEvent) -> Result<()>;
    async fn notify_degraded(&self, event: &DegradedEvent) -> Result<()>;
}

/// Fallback notifier used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_stock(&self, event: &StockEvent) -> Result<()> {
        info!(item_id = %event.item_id, from = %event.from_state, to = %event.to_state,
              "Stock changed: {} is now {}", event.display_name, event.to_state);
        Ok(())
    }

    async fn notify_degraded(&self, event: &DegradedEvent) -> Result<()> {
        info!(item_id = %event.item_id, errors = event.consecutive_errors,
              "Monitoring degraded for {}", event.display_name);
        Ok(())
    }
}
