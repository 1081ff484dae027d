//! Wire types for bots and deals returned by the trading platform
//!
//! 3Commas encodes most numbers as strings ("1.23"), so numeric fields accept
//! either representation.

use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull, DisplayFromStr, PickFirst};

/// Deal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStrategy {
    Long,
    Short,
    #[serde(other)]
    Other,
}

/// A bot together with its currently open deals
#[derive(Debug, Clone, Deserialize)]
pub struct Bot {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active_deals: Vec<Deal>,
}

/// One open position of a bot
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Deal {
    pub id: u64,
    #[serde(default)]
    pub pair: String,
    pub strategy: DealStrategy,
    #[serde_as(as = "DefaultOnNull<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub actual_profit_percentage: f64,
    /// Average entry price including filled safety orders, 0.0 when unknown
    #[serde_as(as = "DefaultOnNull<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub bought_average_price: f64,
    /// Entry price of the base order, which stop-loss % is relative to
    #[serde_as(as = "DefaultOnNull<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub base_order_average_price: f64,
    /// 0.0 (or null on the wire) means no stop-loss is active
    #[serde_as(as = "DefaultOnNull<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub stop_loss_percentage: f64,
    #[serde_as(as = "DefaultOnNull<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub take_profit: f64,
}

impl Deal {
    /// Whether the platform currently has a stop-loss set for this deal
    pub fn has_stop_loss(&self) -> bool {
        self.stop_loss_percentage != 0.0
    }
}

/// Acknowledgement returned after updating a deal
#[derive(Debug, Clone, Deserialize)]
pub struct DealUpdateAck {
    pub id: u64,
}

/// Error body returned by the platform on rejected requests
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl ApiErrorBody {
    /// Most descriptive message available
    pub fn message(self) -> Option<String> {
        self.error_description.or(self.error)
    }
}
