//! CLI command implementations

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{config_path, Config};
use crate::scheduler::{next_interval, threecommas_factory, ConfigSource, Scheduler};
use crate::store::{store_path, DealStore, TrackedDeal};

fn build_scheduler(
    datadir: &Path,
    config: &Config,
    shutdown: CancellationToken,
    reload: Arc<Notify>,
) -> Result<Scheduler> {
    let store = DealStore::open(store_path(datadir))
        .context("Cannot open the deal store, is another instance running?")?;

    Ok(Scheduler::new(
        ConfigSource::new(config_path(datadir), config.clone()),
        store,
        threecommas_factory(),
        shutdown,
        reload,
    ))
}

/// Run the monitor until interrupted
pub async fn start(datadir: &Path, config: &Config) -> Result<()> {
    info!("Starting trailing stop-loss monitor in '{}'", datadir.display());

    let shutdown = CancellationToken::new();
    let reload = Arc::new(Notify::new());
    let mut scheduler = build_scheduler(datadir, config, shutdown.clone(), reload.clone())?;

    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => token.cancel(),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("SIGHUP received, reloading configuration");
                reload.notify_one();
            }
        });

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if terminate.recv().await.is_some() {
                token.cancel();
            }
        });
    }

    scheduler.run().await?;
    Ok(())
}

/// Run exactly one cycle
pub async fn once(datadir: &Path, config: &Config) -> Result<()> {
    let mut scheduler = build_scheduler(
        datadir,
        config,
        CancellationToken::new(),
        Arc::new(Notify::new()),
    )?;

    let summary = scheduler.run_cycle().await;
    let interval = next_interval(&config.settings, summary.deals_to_monitor);

    println!("\n=== CYCLE SUMMARY ===\n");
    println!("Bots checked: {}", summary.bots_checked);
    println!("Bots failed: {}", summary.bots_failed);
    println!("Deals requiring monitoring: {}", summary.deals_to_monitor);
    println!("Suggested next check: {}s", interval.as_secs());

    if summary.aborted {
        anyhow::bail!("Cycle aborted by a deal store error");
    }
    Ok(())
}

/// Show tracked deals per bot
pub async fn status(datadir: &Path, config: &Config) -> Result<()> {
    let store = DealStore::open(store_path(datadir))
        .context("Cannot open the deal store (stop the running monitor first)")?;

    let mut by_bot: BTreeMap<u64, Vec<TrackedDeal>> = BTreeMap::new();
    for deal in store.all()? {
        by_bot.entry(deal.bot_id).or_default().push(deal);
    }

    println!("\n=== TRACKED DEALS ===\n");

    if by_bot.is_empty() {
        println!("No deals are being trailed.");
    }

    for (bot_id, deals) in &by_bot {
        let group = config
            .groups
            .iter()
            .find(|(_, g)| g.botids.contains(bot_id))
            .map(|(name, _)| name.as_str())
            .unwrap_or("not configured");

        println!("Bot {} (group: {})", bot_id, group);
        for deal in deals {
            println!(
                "  Deal {:<12} last profit {:>7.2}%  SL {:>7.2}%  updated {}",
                deal.deal_id,
                deal.last_profit_percentage,
                deal.last_stop_loss_percentage,
                deal.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        println!();
    }

    println!(
        "Configured: {} bot(s) in {} group(s), {} deal(s) tracked",
        config.bot_count(),
        config.groups.len(),
        store.count()?
    );

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
