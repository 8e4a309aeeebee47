use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

use crate::models::{normalize_url, StockState};

/// A product registered for availability monitoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedItem {
    pub id: String,
    pub url: String,
    pub display_name: String,

    pub last_state: StockState,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub consecutive_error_count: u32,

    pub created_at: DateTime<Utc>,
}

/// Outcome of a single availability check. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub item_id: String,
    pub state: StockState,
    pub observed_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// A confident stock transition, pushed to the notifier boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockEvent {
    pub item_id: String,
    pub display_name: String,
    pub url: String,
    pub from_state: StockState,
    pub to_state: StockState,
    pub occurred_at: DateTime<Utc>,
}

/// Raised once when an item's checks have failed too many times in a row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DegradedEvent {
    pub item_id: String,
    pub display_name: String,
    pub url: String,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

fn product_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/products/(\d+)/([^/?#]+)").unwrap())
}

impl WatchedItem {
    /// Builds an item from a validated product URL. The id and display name
    /// follow the `/products/{id}/{slug}` path shape when present; other
    /// paths fall back to a slug of the full path so the id stays stable
    /// across re-adds of the same URL.
    pub fn from_url(url: &Url) -> Self {
        let normalized = normalize_url(url);
        let (id, display_name) = match product_path_pattern().captures(url.path()) {
            Some(caps) => {
                let id = caps[1].to_string();
                let name = caps[2].replace('-', " ");
                (id, name)
            }
            None => {
                let slug: String = url
                    .path()
                    .trim_matches('/')
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                    .collect();
                let slug = if slug.is_empty() { "item".to_string() } else { slug };
                (slug.clone(), slug.replace('-', " "))
            }
        };

        Self {
            id,
            url: normalized,
            display_name,
            last_state: StockState::Unknown,
            last_checked_at: None,
            last_changed_at: None,
            consecutive_error_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>, poll_interval: chrono::Duration) -> bool {
        match self.last_checked_at {
            Some(checked) => now.signed_duration_since(checked) >= poll_interval,
            None => true, // Never checked before
        }
    }
}

impl CheckResult {
    pub fn observed(item_id: &str, state: StockState) -> Self {
        Self {
            item_id: item_id.to_string(),
            state,
            observed_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(item_id: &str, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.to_string(),
            state: StockState::CheckError,
            observed_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}
