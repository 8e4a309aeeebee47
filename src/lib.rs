pub mod checker;
pub mod config;
pub mod detector;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use monitor::StockMonitor;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
