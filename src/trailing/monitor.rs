//! Per-bot deal processing
//!
//! Runs the decision for every active deal of a bot, pushes new levels to the
//! platform and keeps the store in step. The store is only written after the
//! platform acknowledged a change.

use tracing::{debug, error, info, warn};

use crate::config::BotGroupConfig;
use crate::error::Result;
use crate::notify::Notifier;
use crate::platform::{Bot, Deal, DealStrategy, PlatformClient};
use crate::store::DealStore;

use super::decision::{decide, DealAction};
use super::math::price_at_percentage;

/// Outcome of processing one bot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotReport {
    pub bot_id: u64,
    pub name: String,
    pub active_deals: usize,
    /// Deals that need the fast monitor interval
    pub monitored: usize,
    pub armed: usize,
    pub trailed: usize,
    /// Tracked deals dropped because their stop-loss was cleared remotely
    pub released: usize,
    /// Tracked deals dropped because they are no longer active
    pub closed: usize,
}

/// Applies trailing decisions for the bots of one cycle
pub struct DealMonitor<'a> {
    client: &'a dyn PlatformClient,
    store: &'a mut DealStore,
    notifier: &'a Notifier,
}

impl<'a> DealMonitor<'a> {
    pub fn new(
        client: &'a dyn PlatformClient,
        store: &'a mut DealStore,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            client,
            store,
            notifier,
        }
    }

    /// Fetch a bot and process its deals
    ///
    /// Request errors while fetching are returned as-is so the caller can
    /// skip the bot. Store errors are returned as well and end the cycle.
    pub async fn check_bot(&mut self, bot_id: u64, group: &BotGroupConfig) -> Result<BotReport> {
        let bot = self.client.fetch_bot(bot_id).await?;
        self.process_bot(&bot, group).await
    }

    /// Process all active deals of an already fetched bot
    pub async fn process_bot(&mut self, bot: &Bot, group: &BotGroupConfig) -> Result<BotReport> {
        let mut report = BotReport {
            bot_id: bot.id,
            name: bot.name.clone(),
            active_deals: bot.active_deals.len(),
            ..Default::default()
        };

        if bot.active_deals.is_empty() {
            info!("Bot \"{}\" ({}) has no active deals.", bot.name, bot.id);
            report.closed = self.store.delete_all(bot.id)?;
            if report.closed > 0 {
                info!(
                    "Removing all stored deals for bot \"{}\" ({}): {} removed",
                    bot.name, bot.id, report.closed
                );
            }
            return Ok(report);
        }

        let mut current_deals = Vec::with_capacity(bot.active_deals.len());

        for deal in &bot.active_deals {
            if deal.strategy == DealStrategy::Long {
                current_deals.push(deal.id);
            }
            self.process_deal(bot, deal, group, &mut report).await?;
        }

        report.closed = self.store.delete_where(bot.id, &current_deals)?;
        if report.closed > 0 {
            info!(
                "Bot \"{}\" ({}): removed {} closed deal(s) from the store",
                bot.name, bot.id, report.closed
            );
        }

        info!(
            "Bot \"{}\" ({}) has {} deal(s) of which {} require monitoring.",
            bot.name, bot.id, report.active_deals, report.monitored
        );

        Ok(report)
    }

    async fn process_deal(
        &mut self,
        bot: &Bot,
        deal: &Deal,
        group: &BotGroupConfig,
        report: &mut BotReport,
    ) -> Result<()> {
        let tracked = self.store.get(deal.id)?;
        let action = decide(deal, tracked.as_ref(), group);

        if action.requires_monitoring() {
            report.monitored += 1;
        }

        match action {
            DealAction::Unsupported(strategy) => {
                warn!(
                    "Deal {} strategy is {:?}; only long is supported for now!",
                    deal.id, strategy
                );
            }
            DealAction::InvalidPrice => {
                error!(
                    "\"{}\": {}/{} has no usable prices (average {}, base {}), cannot set a stoploss",
                    bot.name,
                    deal.pair,
                    deal.id,
                    deal.bought_average_price,
                    deal.base_order_average_price
                );
            }
            DealAction::BelowActivation => {
                debug!(
                    "\"{}\": {}/{} profit {:.2}% below activation {:.2}%",
                    bot.name,
                    deal.pair,
                    deal.id,
                    deal.actual_profit_percentage,
                    group.activation_percentage
                );
            }
            DealAction::ArmSuppressed(levels) => {
                info!(
                    "\"{}\": {}/{} calculated SL of {:.2}% which will cause 3C not to activate SL. No action taken!",
                    bot.name, deal.pair, deal.id, levels.stop_loss
                );
            }
            DealAction::Arm(levels) => {
                debug!(
                    "\"{}\": {}/{} activation diff {:.2}%, SL price {:.8} (average {:.8}, base {:.8})",
                    bot.name,
                    deal.pair,
                    deal.id,
                    levels.activation_diff,
                    levels.stop_loss_price,
                    deal.bought_average_price,
                    deal.base_order_average_price
                );

                let message = format!(
                    "\"{}\": {}/{} profit ({:.2}%) reached activation ({:.2}%). StopLoss set to {:.2}% (price {:.8}), TakeProfit to {:.2}% (price {:.8})",
                    bot.name,
                    deal.pair,
                    deal.id,
                    deal.actual_profit_percentage,
                    group.activation_percentage,
                    levels.stop_loss,
                    price_at_percentage(deal.base_order_average_price, -levels.stop_loss),
                    levels.take_profit,
                    price_at_percentage(deal.bought_average_price, levels.take_profit),
                );

                if self
                    .push(bot, deal, levels.stop_loss, levels.take_profit)
                    .await
                {
                    self.store.upsert(
                        deal.id,
                        bot.id,
                        deal.actual_profit_percentage,
                        levels.stop_loss,
                    )?;
                    report.armed += 1;
                    info!("{}", message);
                    self.notifier.notify(&message).await;
                }
            }
            DealAction::Hold {
                last_profit_percentage,
            } => {
                info!(
                    "\"{}\": {}/{} no profit increase (current: {:.2}%, last: {:.2}%). Keep on monitoring.",
                    bot.name, deal.pair, deal.id, deal.actual_profit_percentage, last_profit_percentage
                );
            }
            DealAction::TrailSuppressed(levels) => {
                info!(
                    "\"{}\": {}/{} calculated SL of {:.2}% which will cause 3C not to activate SL. No action taken!",
                    bot.name, deal.pair, deal.id, levels.stop_loss
                );
            }
            DealAction::Trail(levels) => {
                let message = format!(
                    "\"{}\": {}/{} profit increased by {:.2}% to {:.2}%. StopLoss changed from {:.2}% to {:.2}% (price {:.8}), TakeProfit from {:.2}% to {:.2}% (price {:.8})",
                    bot.name,
                    deal.pair,
                    deal.id,
                    levels.profit_diff,
                    deal.actual_profit_percentage,
                    deal.stop_loss_percentage,
                    levels.stop_loss,
                    price_at_percentage(deal.base_order_average_price, -levels.stop_loss),
                    deal.take_profit,
                    levels.take_profit,
                    price_at_percentage(deal.bought_average_price, levels.take_profit),
                );

                if self
                    .push(bot, deal, levels.stop_loss, levels.take_profit)
                    .await
                {
                    self.store.upsert(
                        deal.id,
                        bot.id,
                        deal.actual_profit_percentage,
                        levels.stop_loss,
                    )?;
                    report.trailed += 1;
                    info!("{}", message);
                    self.notifier.notify(&message).await;
                }
            }
            DealAction::ExternalReset => {
                self.store.delete(deal.id)?;
                report.released += 1;
                info!(
                    "\"{}\": {}/{} stoploss deactivated by somebody else; stop monitoring and start checking again.",
                    bot.name, deal.pair, deal.id
                );
            }
        }

        Ok(())
    }

    /// Push new levels. Returns true when the platform accepted them.
    async fn push(&self, bot: &Bot, deal: &Deal, stop_loss: f64, take_profit: f64) -> bool {
        match self
            .client
            .submit_deal_update(bot.id, deal.id, stop_loss, take_profit)
            .await
        {
            Ok(ack) => {
                debug!("Deal {} updated (ack {})", deal.id, ack.id);
                true
            }
            Err(e) => {
                error!(
                    "\"{}\": {}/{} error updating deal: {}",
                    bot.name, deal.pair, deal.id, e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::platform::DealUpdateAck;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory platform that records pushed updates
    #[derive(Default)]
    struct FakePlatform {
        bots: HashMap<u64, Bot>,
        updates: Mutex<Vec<(u64, u64, f64, f64)>>,
        reject_updates: bool,
    }

    #[async_trait]
    impl PlatformClient for FakePlatform {
        async fn fetch_bot(&self, bot_id: u64) -> Result<Bot> {
            self.bots
                .get(&bot_id)
                .cloned()
                .ok_or_else(|| Error::NoData(format!("bot {}", bot_id)))
        }

        async fn submit_deal_update(
            &self,
            bot_id: u64,
            deal_id: u64,
            stop_loss_percentage: f64,
            take_profit: f64,
        ) -> Result<DealUpdateAck> {
            if self.reject_updates {
                return Err(Error::api("Stop loss is invalid"));
            }
            self.updates
                .lock()
                .unwrap()
                .push((bot_id, deal_id, stop_loss_percentage, take_profit));
            Ok(DealUpdateAck { id: deal_id })
        }
    }

    impl FakePlatform {
        fn with_bot(bot: Bot) -> Self {
            let mut platform = Self::default();
            platform.bots.insert(bot.id, bot);
            platform
        }

        fn updates(&self) -> Vec<(u64, u64, f64, f64)> {
            self.updates.lock().unwrap().clone()
        }
    }

    fn group() -> BotGroupConfig {
        BotGroupConfig {
            botids: vec![5],
            activation_percentage: 3.0,
            initial_stoploss_percentage: 1.0,
            sl_increment_factor: 0.5,
            tp_increment_factor: 0.5,
        }
    }

    fn deal(id: u64, profit: f64, stop_loss: f64, take_profit: f64) -> Deal {
        Deal {
            id,
            pair: "USDT_BTC".to_string(),
            strategy: DealStrategy::Long,
            actual_profit_percentage: profit,
            bought_average_price: 100.0,
            base_order_average_price: 100.0,
            stop_loss_percentage: stop_loss,
            take_profit,
        }
    }

    fn bot(deals: Vec<Deal>) -> Bot {
        Bot {
            id: 5,
            name: "BTC long".to_string(),
            active_deals: deals,
        }
    }

    async fn run(platform: &FakePlatform, store: &mut DealStore) -> BotReport {
        let notifier = Notifier::disabled();
        let mut monitor = DealMonitor::new(platform, store, &notifier);
        monitor.check_bot(5, &group()).await.unwrap()
    }

    #[tokio::test]
    async fn test_below_activation_not_tracked() {
        let platform = FakePlatform::with_bot(bot(vec![deal(1, 2.9, 0.0, 2.0), deal(2, -4.0, 0.0, 2.0)]));
        let mut store = DealStore::open_in_memory().unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.monitored, 0);
        assert_eq!(store.count().unwrap(), 0);
        assert!(platform.updates().is_empty());
    }

    #[tokio::test]
    async fn test_arm_pushes_then_tracks() {
        let platform = FakePlatform::with_bot(bot(vec![deal(77, 5.0, 0.0, 2.0)]));
        let mut store = DealStore::open_in_memory().unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.armed, 1);
        assert_eq!(report.monitored, 1);
        assert_eq!(platform.updates(), vec![(5, 77, -2.0, 3.0)]);

        let tracked = store.get(77).unwrap().unwrap();
        assert_eq!(tracked.bot_id, 5);
        assert_eq!(tracked.last_profit_percentage, 5.0);
        assert_eq!(tracked.last_stop_loss_percentage, -2.0);
    }

    #[tokio::test]
    async fn test_rejected_push_leaves_store_untouched() {
        let mut platform = FakePlatform::with_bot(bot(vec![deal(77, 5.0, 0.0, 2.0)]));
        platform.reject_updates = true;
        let mut store = DealStore::open_in_memory().unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.armed, 0);
        // Still counted, it will be retried on the fast interval
        assert_eq!(report.monitored, 1);
        assert!(store.get(77).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_stop_loss_not_armed() {
        let platform = FakePlatform::with_bot(bot(vec![deal(77, 3.0, 0.0, 2.0)]));
        let mut store = DealStore::open_in_memory().unwrap();
        let mut params = group();
        params.initial_stoploss_percentage = 0.0;

        let notifier = Notifier::disabled();
        let mut monitor = DealMonitor::new(&platform, &mut store, &notifier);
        let report = monitor.check_bot(5, &params).await.unwrap();

        assert_eq!(report.armed, 0);
        assert!(platform.updates().is_empty());
        assert!(store.get(77).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trail_on_profit_increase() {
        let platform = FakePlatform::with_bot(bot(vec![deal(77, 6.0, -2.0, 3.0)]));
        let mut store = DealStore::open_in_memory().unwrap();
        store.upsert(77, 5, 5.0, -2.0).unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.trailed, 1);
        assert_eq!(platform.updates(), vec![(5, 77, -2.5, 3.5)]);
        let tracked = store.get(77).unwrap().unwrap();
        assert_eq!(tracked.last_profit_percentage, 6.0);
        assert_eq!(tracked.last_stop_loss_percentage, -2.5);
    }

    #[tokio::test]
    async fn test_hold_keeps_monitoring() {
        let platform = FakePlatform::with_bot(bot(vec![deal(77, 4.0, -2.0, 3.0)]));
        let mut store = DealStore::open_in_memory().unwrap();
        store.upsert(77, 5, 5.0, -2.0).unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.monitored, 1);
        assert_eq!(report.trailed, 0);
        assert!(platform.updates().is_empty());
        assert_eq!(store.get(77).unwrap().unwrap().last_profit_percentage, 5.0);
    }

    #[tokio::test]
    async fn test_trail_suppressed_keeps_row() {
        let platform = FakePlatform::with_bot(bot(vec![deal(77, 6.0, 0.5, 3.0)]));
        let mut store = DealStore::open_in_memory().unwrap();
        store.upsert(77, 5, 5.0, 0.5).unwrap();

        run(&platform, &mut store).await;

        assert!(platform.updates().is_empty());
        let tracked = store.get(77).unwrap().unwrap();
        assert_eq!(tracked.last_profit_percentage, 5.0);
        assert_eq!(tracked.last_stop_loss_percentage, 0.5);
    }

    #[tokio::test]
    async fn test_external_reset_releases_deal() {
        let platform = FakePlatform::with_bot(bot(vec![deal(77, 6.0, 0.0, 3.0)]));
        let mut store = DealStore::open_in_memory().unwrap();
        store.upsert(77, 5, 5.0, -2.0).unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.released, 1);
        assert_eq!(report.monitored, 0);
        assert!(platform.updates().is_empty());
        assert!(store.get(77).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_deal_skipped() {
        let mut short = deal(78, 10.0, 0.0, 2.0);
        short.strategy = DealStrategy::Short;
        let platform = FakePlatform::with_bot(bot(vec![short]));
        let mut store = DealStore::open_in_memory().unwrap();

        let report = run(&platform, &mut store).await;

        assert_eq!(report.monitored, 0);
        assert!(platform.updates().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_deals_removed() {
        let platform = FakePlatform::with_bot(bot(vec![deal(2, 4.0, -1.0, 2.0)]));
        let mut store = DealStore::open_in_memory().unwrap();
        store.upsert(1, 5, 4.0, -1.0).unwrap();
        store.upsert(2, 5, 4.0, -1.0).unwrap();
        store.upsert(3, 5, 4.0, -1.0).unwrap();
        store.upsert(9, 6, 4.0, -1.0).unwrap();

        let report = run(&platform, &mut store).await;
        assert_eq!(report.closed, 2);

        // Same active set again: nothing more to remove
        let report = run(&platform, &mut store).await;
        assert_eq!(report.closed, 0);

        let remaining: Vec<u64> = store.all().unwrap().iter().map(|d| d.deal_id).collect();
        assert_eq!(remaining, vec![2, 9]);
    }

    #[tokio::test]
    async fn test_no_active_deals_clears_bot() {
        let platform = FakePlatform::with_bot(bot(vec![]));
        let mut store = DealStore::open_in_memory().unwrap();
        for deal_id in 1..=3 {
            store.upsert(deal_id, 5, 4.0, -1.0).unwrap();
        }

        let report = run(&platform, &mut store).await;

        assert_eq!(report.closed, 3);
        assert_eq!(report.armed + report.trailed, 0);
        assert!(platform.updates().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unpriced_deal_does_not_block_bot() {
        let bot: Bot = serde_json::from_str(
            r#"{
            "id": 5,
            "name": "BTC long",
            "active_deals": [
                {
                    "id": 1,
                    "pair": "USDT_BTC",
                    "strategy": "long",
                    "actual_profit_percentage": "6.0",
                    "bought_average_price": "100.0",
                    "base_order_average_price": "100.0",
                    "stop_loss_percentage": "-2.0",
                    "take_profit": "3.0"
                },
                {
                    "id": 2,
                    "pair": "USDT_ETH",
                    "strategy": "long",
                    "actual_profit_percentage": "5.0",
                    "bought_average_price": null,
                    "base_order_average_price": null,
                    "stop_loss_percentage": null,
                    "take_profit": "2.0"
                }
            ]
        }"#,
        )
        .unwrap();
        let platform = FakePlatform::with_bot(bot);
        let mut store = DealStore::open_in_memory().unwrap();
        store.upsert(1, 5, 5.0, -2.0).unwrap();
        store.upsert(3, 5, 4.0, -1.0).unwrap();

        let report = run(&platform, &mut store).await;

        // Armed deal still trails, closed deal still reconciled
        assert_eq!(report.trailed, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(report.monitored, 2);
        assert_eq!(platform.updates(), vec![(5, 1, -2.5, 3.5)]);
        assert!(store.get(2).unwrap().is_none());
        assert!(store.get(3).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_is_request_error() {
        let platform = FakePlatform::default();
        let mut store = DealStore::open_in_memory().unwrap();
        let notifier = Notifier::disabled();

        let mut monitor = DealMonitor::new(&platform, &mut store, &notifier);
        let err = monitor.check_bot(5, &group()).await.unwrap_err();
        assert!(err.is_request_error());
    }

    #[tokio::test]
    async fn test_trailing_cycle_never_loosens() {
        let mut store = DealStore::open_in_memory().unwrap();
        let mut stop_loss = 0.0;
        let mut take_profit = 2.0;

        for profit in [3.5, 4.0, 3.8, 5.2, 7.9] {
            let platform =
                FakePlatform::with_bot(bot(vec![deal(77, profit, stop_loss, take_profit)]));
            run(&platform, &mut store).await;

            if let Some((_, _, sl, tp)) = platform.updates().last().copied() {
                if stop_loss != 0.0 {
                    assert!(sl <= stop_loss);
                }
                stop_loss = sl;
                take_profit = tp;
            }
        }

        assert_eq!(store.get(77).unwrap().unwrap().last_profit_percentage, 7.9);
    }
}
