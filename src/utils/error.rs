use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate URL already watched: {url}")]
    DuplicateUrl { url: String },

    #[error("Product id already watched: {id}")]
    DuplicateId { id: String },

    #[error("Domain not in allow-list: {host}")]
    DisallowedDomain { host: String },

    #[error("Item not found: {id}")]
    NotFound { id: String },

    #[error("No render session became idle within {timeout_ms}ms")]
    PoolExhausted { timeout_ms: u64 },

    #[error("Render session pool degraded: {0}")]
    PoolDegraded(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Notification delivery failed: {0}")]
    NotifierDelivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that must stop the engine rather than be absorbed into an
    /// item's error counter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Persistence(_) | AppError::PoolDegraded(_))
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
