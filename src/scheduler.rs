//! Cycle loop
//!
//! One cycle reloads the configuration, checks every bot of every group and
//! then waits. The wait is short while any deal is being trailed and long
//! otherwise. Shutdown and reload requests are only observed while waiting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Settings};
use crate::error::Result;
use crate::notify::Notifier;
use crate::platform::{PlatformClient, ThreeCommasClient};
use crate::store::DealStore;
use crate::trailing::DealMonitor;

/// Where the scheduler is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Waiting,
    Stopped,
}

/// Why a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Shutdown,
    Reload,
}

/// Sleep for `duration` unless shutdown or a reload is requested first
pub async fn wait_interval(
    duration: Duration,
    shutdown: &CancellationToken,
    reload: &Notify,
) -> WaitOutcome {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => WaitOutcome::Shutdown,
        _ = reload.notified() => WaitOutcome::Reload,
        _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
    }
}

/// Wait until the next cycle
pub fn next_interval(settings: &Settings, deals_to_monitor: usize) -> Duration {
    if deals_to_monitor > 0 {
        Duration::from_secs(settings.monitor_interval)
    } else {
        Duration::from_secs(settings.check_interval)
    }
}

/// Config file that is re-read at the start of every cycle
pub struct ConfigSource {
    path: PathBuf,
    current: Config,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>, initial: Config) -> Self {
        Self {
            path: path.into(),
            current: initial,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    /// Re-read the file. A broken file keeps the previous snapshot.
    pub fn reload(&mut self) -> &Config {
        match Config::load(&self.path) {
            Ok(config) => {
                if config != self.current {
                    info!("Reloaded configuration from '{}'", self.path.display());
                }
                self.current = config;
            }
            Err(e) => {
                error!(
                    "Failed to reload configuration '{}', keeping the previous one: {:#}",
                    self.path.display(),
                    e
                );
            }
        }
        &self.current
    }
}

/// Builds a platform client from the current settings
pub type ClientFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn PlatformClient>> + Send + Sync>;

/// Factory for the real 3Commas client
pub fn threecommas_factory() -> ClientFactory {
    Box::new(|settings: &Settings| -> Result<Arc<dyn PlatformClient>> {
        let client = ThreeCommasClient::from_settings(settings)?;
        Ok(Arc::new(client) as Arc<dyn PlatformClient>)
    })
}

/// Settings a client was built from; a change forces a rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
struct ClientKey {
    api_url: String,
    api_key: String,
    api_secret: String,
    request_timeout: u64,
}

impl From<&Settings> for ClientKey {
    fn from(settings: &Settings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            request_timeout: settings.request_timeout,
        }
    }
}

/// Settings a notifier was built from
#[derive(Debug, Clone, PartialEq, Eq)]
struct NotifierKey {
    notifications: bool,
    notify_urls: Vec<String>,
}

impl From<&Settings> for NotifierKey {
    fn from(settings: &Settings) -> Self {
        Self {
            notifications: settings.notifications,
            notify_urls: settings.notify_urls.clone(),
        }
    }
}

/// Result of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub bots_checked: usize,
    pub bots_failed: usize,
    /// Deals that need the short monitor interval
    pub deals_to_monitor: usize,
    /// A store error ended the cycle early
    pub aborted: bool,
}

/// Drives the monitor cycles
pub struct Scheduler {
    config: ConfigSource,
    store: DealStore,
    client_factory: ClientFactory,
    client: Option<(ClientKey, Arc<dyn PlatformClient>)>,
    notifier_key: NotifierKey,
    notifier: Notifier,
    state: SchedulerState,
    shutdown: CancellationToken,
    reload: Arc<Notify>,
}

impl Scheduler {
    pub fn new(
        config: ConfigSource,
        store: DealStore,
        client_factory: ClientFactory,
        shutdown: CancellationToken,
        reload: Arc<Notify>,
    ) -> Self {
        let settings = &config.current().settings;
        let notifier_key = NotifierKey::from(settings);
        let notifier = Notifier::from_settings(settings);
        Self {
            config,
            store,
            client_factory,
            client: None,
            notifier_key,
            notifier,
            state: SchedulerState::Stopped,
            shutdown,
            reload,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            debug!("Scheduler {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Run cycles until shutdown is requested
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Monitoring {} bot(s) in {} group(s)",
            self.config.current().bot_count(),
            self.config.current().groups.len()
        );

        loop {
            self.set_state(SchedulerState::Running);
            let summary = self.run_cycle().await;

            let interval = next_interval(&self.config.current().settings, summary.deals_to_monitor);
            self.set_state(SchedulerState::Waiting);
            info!(
                "Next check in {}s ({} deal(s) require monitoring)",
                interval.as_secs(),
                summary.deals_to_monitor
            );

            match wait_interval(interval, &self.shutdown, &self.reload).await {
                WaitOutcome::Elapsed => {}
                WaitOutcome::Reload => info!("Reload requested, starting next cycle now"),
                WaitOutcome::Shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.set_state(SchedulerState::Stopped);
        info!("Monitor stopped");
        Ok(())
    }

    /// Reload the config and check every configured bot once
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        self.config.reload();
        let config = self.config.current().clone();
        self.refresh_notifier(&config.settings);

        let Some(client) = self.platform_client(&config.settings) else {
            return summary;
        };

        let mut monitor = DealMonitor::new(client.as_ref(), &mut self.store, &self.notifier);

        for (name, group) in &config.groups {
            debug!("Checking group '{}' ({} bot(s))", name, group.botids.len());

            for bot_id in &group.botids {
                match monitor.check_bot(*bot_id, group).await {
                    Ok(report) => {
                        summary.bots_checked += 1;
                        summary.deals_to_monitor += report.monitored;
                    }
                    Err(e) if e.is_store_error() => {
                        error!("Deal store failure, aborting this cycle: {}", e);
                        summary.aborted = true;
                        return summary;
                    }
                    Err(e) => {
                        error!("Error occurred while checking bot {}: {}", bot_id, e);
                        summary.bots_failed += 1;
                    }
                }
            }
        }

        summary
    }

    /// Current client, rebuilt when the API settings changed
    fn platform_client(&mut self, settings: &Settings) -> Option<Arc<dyn PlatformClient>> {
        let key = ClientKey::from(settings);

        if let Some((current, client)) = &self.client {
            if *current == key {
                return Some(client.clone());
            }
            info!("API settings changed, reconnecting");
        }

        match (self.client_factory)(settings) {
            Ok(client) => {
                self.client = Some((key, client.clone()));
                Some(client)
            }
            Err(e) => {
                error!("Cannot create platform client: {}", e);
                self.client = None;
                None
            }
        }
    }

    /// Rebuild the notifier when its settings changed. Returns true on rebuild.
    fn refresh_notifier(&mut self, settings: &Settings) -> bool {
        let key = NotifierKey::from(settings);
        if key == self.notifier_key {
            return false;
        }

        let notifier = Notifier::from_settings(settings);
        if notifier.is_active() != self.notifier.is_active() {
            if notifier.is_active() {
                info!("Notifications enabled");
            } else {
                warn!("Notifications disabled");
            }
        }
        self.notifier_key = key;
        self.notifier = notifier;
        true
    }

    pub fn store(&self) -> &DealStore {
        &self.store
    }
}
