//! Stop-loss and take-profit arithmetic
//!
//! The platform expresses stop-loss as a percentage of the base order price,
//! while profit is measured against the average price after safety orders.
//! A negative stop-loss percentage places the stop above the base order price.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::BotGroupConfig;

/// Round to two decimals, the precision the platform accepts
///
/// Rounds the exact binary value with ties to even, so 0.015 (stored as
/// 0.01499...) becomes 0.01 and 0.125 becomes 0.12.
pub fn round2(value: f64) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Price that lies `percentage` % above `price`
pub fn price_at_percentage(price: f64, percentage: f64) -> f64 {
    price + (price / 100.0) * percentage
}

/// Levels computed when a deal first reaches the activation percentage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmLevels {
    /// Profit above the activation percentage
    pub activation_diff: f64,
    /// Absolute stop-loss price derived from the average price
    pub stop_loss_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Levels computed when an armed deal's profit increased
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailLevels {
    /// Profit increase since the last push
    pub profit_diff: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Compute the initial stop-loss and take-profit for a deal
///
/// The stop-loss price is placed `initial_stoploss_percentage` above the
/// average price, plus a share of the profit already made past activation.
/// It is then expressed relative to the base order price.
pub fn arm_levels(
    actual_profit_percentage: f64,
    bought_average_price: f64,
    base_order_average_price: f64,
    current_take_profit: f64,
    group: &BotGroupConfig,
) -> ArmLevels {
    let activation_diff = actual_profit_percentage - group.activation_percentage;

    let stop_loss_price = bought_average_price
        * (1.0
            + (group.initial_stoploss_percentage / 100.0
                + (activation_diff / 100.0) * group.sl_increment_factor));

    let stop_loss = round2(100.0 - (stop_loss_price / base_order_average_price) * 100.0);
    let take_profit = round2(current_take_profit + activation_diff * group.tp_increment_factor);

    ArmLevels {
        activation_diff,
        stop_loss_price,
        stop_loss,
        take_profit,
    }
}

/// Move stop-loss and take-profit along with a profit increase
///
/// Because the armed stop-loss already accounts for the price difference
/// between base order and average, only the profit change is applied.
pub fn trail_levels(
    actual_profit_percentage: f64,
    last_profit_percentage: f64,
    actual_stop_loss: f64,
    actual_take_profit: f64,
    group: &BotGroupConfig,
) -> TrailLevels {
    let profit_diff = actual_profit_percentage - last_profit_percentage;

    TrailLevels {
        profit_diff,
        stop_loss: round2(actual_stop_loss - profit_diff * group.sl_increment_factor),
        take_profit: round2(actual_take_profit + profit_diff * group.tp_increment_factor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(activation: f64, initial_sl: f64, sl_factor: f64, tp_factor: f64) -> BotGroupConfig {
        BotGroupConfig {
            botids: vec![1],
            activation_percentage: activation,
            initial_stoploss_percentage: initial_sl,
            sl_increment_factor: sl_factor,
            tp_increment_factor: tp_factor,
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.234), 1.23);
        assert_eq!(round2(1.236), 1.24);
        assert_eq!(round2(-2.0000000001), -2.0);
        assert_eq!(round2(0.004), 0.0);
    }

    #[test]
    fn test_round2_uses_exact_binary_value() {
        // 0.015 and 1.005 are stored slightly below the midpoint
        assert_eq!(round2(0.015), 0.01);
        assert_eq!(round2(1.005), 1.0);
        // Exact midpoints go to the even cent
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(-2.675), -2.67);
    }

    #[test]
    fn test_arm_levels_reference_scenario() {
        let levels = arm_levels(5.0, 100.0, 100.0, 2.0, &group(3.0, 1.0, 0.5, 0.5));

        assert!((levels.activation_diff - 2.0).abs() < 1e-9);
        assert!((levels.stop_loss_price - 102.0).abs() < 1e-9);
        assert_eq!(levels.stop_loss, -2.0);
        assert_eq!(levels.take_profit, 3.0);
    }

    #[test]
    fn test_arm_levels_with_safety_orders() {
        // Average price dropped to 90 after safety orders, base order at 100
        let levels = arm_levels(3.0, 90.0, 100.0, 1.5, &group(3.0, 1.0, 0.5, 0.5));

        // SL price 90.9 is 9.1% below the base order price
        assert!((levels.stop_loss_price - 90.9).abs() < 1e-9);
        assert_eq!(levels.stop_loss, 9.1);
        assert_eq!(levels.take_profit, 1.5);
    }

    #[test]
    fn test_arm_levels_zero_boundary() {
        let levels = arm_levels(3.0, 100.0, 100.0, 1.0, &group(3.0, 0.0, 0.5, 0.5));
        assert_eq!(levels.stop_loss, 0.0);
    }

    #[test]
    fn test_trail_levels_tighten_stop_loss() {
        let levels = trail_levels(6.0, 5.0, -2.0, 3.0, &group(3.0, 1.0, 0.5, 0.5));
        assert!((levels.profit_diff - 1.0).abs() < 1e-9);
        assert_eq!(levels.stop_loss, -2.5);
        assert_eq!(levels.take_profit, 3.5);
    }

    #[test]
    fn test_trail_levels_never_loosen() {
        let params = group(3.0, 1.0, 0.8, 0.0);
        let mut stop_loss = 1.0;
        let mut last_profit = 3.0;
        for profit in [3.1, 3.7, 4.2, 6.0, 9.9] {
            let levels = trail_levels(profit, last_profit, stop_loss, 2.0, &params);
            assert!(levels.stop_loss <= stop_loss);
            assert_eq!(levels.take_profit, 2.0);
            stop_loss = levels.stop_loss;
            last_profit = profit;
        }
    }

    #[test]
    fn test_price_at_percentage() {
        assert_eq!(price_at_percentage(200.0, 5.0), 210.0);
        assert_eq!(price_at_percentage(200.0, -2.5), 195.0);
    }
}
