//! Trading platform access
//!
//! The monitor only needs two calls from the platform: fetch a bot with its
//! active deals, and push new stop-loss/take-profit values for a deal.

pub mod threecommas;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use threecommas::ThreeCommasClient;
pub use types::{Bot, Deal, DealStrategy, DealUpdateAck};

/// Operations the monitor performs against the trading platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch a bot including its active deals
    async fn fetch_bot(&self, bot_id: u64) -> Result<Bot>;

    /// Overwrite the stop-loss and take-profit percentages of a deal
    async fn submit_deal_update(
        &self,
        bot_id: u64,
        deal_id: u64,
        stop_loss_percentage: f64,
        take_profit: f64,
    ) -> Result<DealUpdateAck>;
}
