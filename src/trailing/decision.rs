//! Per-deal classification
//!
//! Given a deal as reported by the platform and the row the store holds for
//! it (if any), decide what the monitor should do. No I/O happens here.

use crate::config::BotGroupConfig;
use crate::platform::{Deal, DealStrategy};
use crate::store::TrackedDeal;

use super::math::{arm_levels, trail_levels, ArmLevels, TrailLevels};

/// What to do with one deal in this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum DealAction {
    /// Only long deals can be trailed
    Unsupported(DealStrategy),
    /// Average or base order price is missing, no stop-loss can be expressed
    InvalidPrice,
    /// Not tracked and profit has not reached the activation percentage
    BelowActivation,
    /// Push the initial stop-loss and take-profit
    Arm(ArmLevels),
    /// Arming would produce a 0.00 stop-loss, which the platform treats as "off"
    ArmSuppressed(ArmLevels),
    /// Profit increased, move stop-loss and take-profit along
    Trail(TrailLevels),
    /// Trailing would produce a 0.00 stop-loss
    TrailSuppressed(TrailLevels),
    /// Armed, but no profit increase since the last push
    Hold { last_profit_percentage: f64 },
    /// Tracked, but the stop-loss was cleared on the platform
    ExternalReset,
}

impl DealAction {
    /// Whether the deal counts towards the deals that need the fast interval
    pub fn requires_monitoring(&self) -> bool {
        matches!(
            self,
            DealAction::Arm(_)
                | DealAction::ArmSuppressed(_)
                | DealAction::InvalidPrice
                | DealAction::Trail(_)
                | DealAction::TrailSuppressed(_)
                | DealAction::Hold { .. }
        )
    }
}

/// Classify a deal
pub fn decide(deal: &Deal, tracked: Option<&TrackedDeal>, group: &BotGroupConfig) -> DealAction {
    if deal.strategy != DealStrategy::Long {
        return DealAction::Unsupported(deal.strategy);
    }

    match tracked {
        None => {
            if deal.actual_profit_percentage < group.activation_percentage {
                return DealAction::BelowActivation;
            }

            if !(deal.bought_average_price > 0.0 && deal.base_order_average_price > 0.0) {
                return DealAction::InvalidPrice;
            }

            let levels = arm_levels(
                deal.actual_profit_percentage,
                deal.bought_average_price,
                deal.base_order_average_price,
                deal.take_profit,
                group,
            );

            if levels.stop_loss == 0.0 {
                DealAction::ArmSuppressed(levels)
            } else {
                DealAction::Arm(levels)
            }
        }
        Some(_) if !deal.has_stop_loss() => DealAction::ExternalReset,
        Some(tracked) => {
            if deal.actual_profit_percentage <= tracked.last_profit_percentage {
                return DealAction::Hold {
                    last_profit_percentage: tracked.last_profit_percentage,
                };
            }

            let levels = trail_levels(
                deal.actual_profit_percentage,
                tracked.last_profit_percentage,
                deal.stop_loss_percentage,
                deal.take_profit,
                group,
            );

            if levels.stop_loss == 0.0 {
                DealAction::TrailSuppressed(levels)
            } else {
                DealAction::Trail(levels)
            }
        }
    }
}
