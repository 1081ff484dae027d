//! Trailing stop-loss / take-profit monitor for 3Commas deals
//!
//! Polls the configured bots, arms a stop-loss once a deal reaches its
//! activation profit and trails stop-loss and take-profit as profit grows.

pub mod cli;
pub mod config;
pub mod error;
pub mod notify;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod trailing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
