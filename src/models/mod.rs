use serde::{Deserialize, Serialize};
use url::Url;

pub mod item;

// Re-exports for convenience
pub use item::*;

/// Stock verdict for a product page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockState {
    Unknown,
    InStock,
    OutOfStock,
    CheckError,
}

impl StockState {
    /// A confident state is one backed by an actual page observation, as
    /// opposed to startup defaults or failed checks.
    pub fn is_confident(&self) -> bool {
        matches!(self, StockState::InStock | StockState::OutOfStock)
    }
}

impl std::fmt::Display for StockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StockState::Unknown => "unknown",
            StockState::InStock => "in stock",
            StockState::OutOfStock => "out of stock",
            StockState::CheckError => "check error",
        };
        write!(f, "{label}")
    }
}

/// Canonical cache/duplicate key for a product URL: no fragment, no trailing
/// slash, host lowercased by the parser.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let s = normalized.to_string();
    s.strip_suffix('/').map(str::to_string).unwrap_or(s)
}
