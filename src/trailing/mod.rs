//! Trailing stop-loss / take-profit engine
//!
//! - `math`: percentage arithmetic for arming and trailing
//! - `decision`: classifies a deal against its tracked state
//! - `monitor`: applies decisions for a bot and reconciles the store

pub mod decision;
pub mod math;
pub mod monitor;

pub use decision::{decide, DealAction};
pub use math::{arm_levels, round2, trail_levels, ArmLevels, TrailLevels};
pub use monitor::{BotReport, DealMonitor};
