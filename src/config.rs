//! Configuration loading and validation
//!
//! The config file lives in the data directory and is re-read at the top of
//! every monitor cycle, so parameter changes apply without a restart.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Program name, used for the config and database file names
pub const PROGRAM: &str = "tsltp";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    /// Bot groups keyed by name, each sharing one set of trailing parameters
    #[serde(default)]
    pub groups: BTreeMap<String, BotGroupConfig>,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Seconds between cycles when no deal is being trailed
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Seconds between cycles while at least one deal is being trailed
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default)]
    pub notifications: bool,
    #[serde(default)]
    pub notify_urls: Vec<String>,

    // Single-group layout from older releases, moved into `groups` on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub botids: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_stoploss_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl_increment_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tp_increment_factor: Option<f64>,
}

/// Trailing parameters shared by a group of bots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotGroupConfig {
    pub botids: Vec<u64>,
    /// Profit % at which the stop-loss gets armed
    pub activation_percentage: f64,
    /// Stop-loss % (relative to the average price) set when arming
    pub initial_stoploss_percentage: f64,
    /// Stop-loss movement per % of profit increase
    pub sl_increment_factor: f64,
    /// Take-profit movement per % of profit increase
    pub tp_increment_factor: f64,
}

fn default_check_interval() -> u64 {
    120
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_api_url() -> String {
    "https://api.3commas.io".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            monitor_interval: default_monitor_interval(),
            debug: false,
            api_key: "Your 3Commas API Key".to_string(),
            api_secret: "Your 3Commas API Secret".to_string(),
            api_url: default_api_url(),
            request_timeout: default_request_timeout(),
            notifications: false,
            notify_urls: vec!["https://example.com/notify-url1".to_string()],
            botids: None,
            activation_percentage: None,
            initial_stoploss_percentage: None,
            sl_increment_factor: None,
            tp_increment_factor: None,
        }
    }
}

impl Default for BotGroupConfig {
    fn default() -> Self {
        Self {
            botids: vec![12345, 67890],
            activation_percentage: 3.0,
            initial_stoploss_percentage: 1.0,
            sl_increment_factor: 0.5,
            tp_increment_factor: 0.5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert("default".to_string(), BotGroupConfig::default());
        Self {
            settings: Settings::default(),
            groups,
        }
    }
}

/// Path of the config file inside a data directory
pub fn config_path(datadir: &Path) -> PathBuf {
    datadir.join(format!("{}.toml", PROGRAM))
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Secrets may come from the environment (or .env) instead of the file
        Self::load_with_secrets(
            path,
            std::env::var("TSLTP_API_KEY").ok(),
            std::env::var("TSLTP_API_SECRET").ok(),
        )
    }

    fn load_with_secrets<P: AsRef<Path>>(
        path: P,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::read(path, api_key, api_secret)?;

        if config.upgrade_legacy() {
            error!(
                "Upgrading config file '{}' to support multiple bot groups",
                path.display()
            );
            // Only what the file itself holds is written back
            let mut on_disk = Self::read(path, None, None)?;
            on_disk.upgrade_legacy();
            on_disk.save(path)?;
            info!("Upgraded the configuration file");
        }

        config.validate()?;

        Ok(config)
    }

    fn read(path: &Path, api_key: Option<String>, api_secret: Option<String>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .set_override_option("settings.api-key", api_key)?
            .set_override_option("settings.api-secret", api_secret)?
            .build()
            .with_context(|| format!("Failed to read configuration '{}'", path.display()))?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load the config, or write an example one when the file does not exist yet
    ///
    /// Returns `None` when the example was just created.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path).map(Some);
        }

        Config::default().save(path)?;
        info!(
            "Created example config file '{}', edit it and restart the program",
            path.display()
        );
        Ok(None)
    }

    /// Write configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration '{}'", path.display()))?;
        Ok(())
    }

    /// Move bot parameters kept in `[settings]` by older releases into a
    /// `default` group. Returns true when something was moved.
    fn upgrade_legacy(&mut self) -> bool {
        let Some(botids) = self.settings.botids.take() else {
            return false;
        };

        let fallback = BotGroupConfig::default();
        let group = BotGroupConfig {
            botids,
            activation_percentage: self
                .settings
                .activation_percentage
                .take()
                .unwrap_or(fallback.activation_percentage),
            initial_stoploss_percentage: self
                .settings
                .initial_stoploss_percentage
                .take()
                .unwrap_or(fallback.initial_stoploss_percentage),
            sl_increment_factor: self
                .settings
                .sl_increment_factor
                .take()
                .unwrap_or(fallback.sl_increment_factor),
            tp_increment_factor: self
                .settings
                .tp_increment_factor
                .take()
                .unwrap_or(fallback.tp_increment_factor),
        };

        self.groups.entry("default".to_string()).or_insert(group);
        true
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.settings.check_interval == 0 {
            anyhow::bail!("check-interval must be positive");
        }

        if self.settings.monitor_interval == 0 {
            anyhow::bail!("monitor-interval must be positive");
        }

        if self.settings.monitor_interval > self.settings.check_interval {
            warn!(
                "monitor-interval ({}s) is longer than check-interval ({}s)",
                self.settings.monitor_interval, self.settings.check_interval
            );
        }

        if self.groups.is_empty() {
            warn!("No bot groups configured, nothing will be monitored");
        }

        for (name, group) in &self.groups {
            if group.botids.is_empty() {
                anyhow::bail!("Group '{}' has no botids", name);
            }
            if !group.activation_percentage.is_finite() {
                anyhow::bail!("Group '{}' activation-percentage must be a number", name);
            }
            if !group.initial_stoploss_percentage.is_finite() {
                anyhow::bail!("Group '{}' initial-stoploss-percentage must be a number", name);
            }
            if !(group.sl_increment_factor >= 0.0) {
                anyhow::bail!("Group '{}' sl-increment-factor cannot be negative", name);
            }
            if !(group.tp_increment_factor >= 0.0) {
                anyhow::bail!("Group '{}' tp-increment-factor cannot be negative", name);
            }
        }

        if self.settings.notifications && self.settings.notify_urls.is_empty() {
            warn!("Notifications enabled but no notify-urls configured");
        }

        Ok(())
    }

    /// Read only the `debug` flag, for setting up logging before the full load
    pub fn debug_requested<P: AsRef<Path>>(path: P) -> bool {
        #[derive(Deserialize, Default)]
        struct DebugOnly {
            #[serde(default)]
            settings: DebugSettings,
        }

        #[derive(Deserialize, Default)]
        struct DebugSettings {
            #[serde(default)]
            debug: bool,
        }

        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| toml::from_str::<DebugOnly>(&content).ok())
            .map(|parsed| parsed.settings.debug)
            .unwrap_or(false)
    }

    /// Total number of bots over all groups
    pub fn bot_count(&self) -> usize {
        self.groups.values().map(|g| g.botids.len()).sum()
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let mut out = format!(
            r#"Configuration:
  Settings:
    check-interval: {}s
    monitor-interval: {}s
    debug: {}
    api-url: {}
    api-key: {}
    api-secret: {}
    notifications: {} ({} url(s))
"#,
            self.settings.check_interval,
            self.settings.monitor_interval,
            self.settings.debug,
            self.settings.api_url,
            mask_secret(&self.settings.api_key),
            mask_secret(&self.settings.api_secret),
            self.settings.notifications,
            self.settings.notify_urls.len(),
        );

        for (name, group) in &self.groups {
            out.push_str(&format!(
                "  Group {}:\n    botids: {:?}\n    activation: {}%\n    initial stoploss: {}%\n    sl factor: {}\n    tp factor: {}\n",
                name,
                group.botids,
                group.activation_percentage,
                group.initial_stoploss_percentage,
                group.sl_increment_factor,
                group.tp_increment_factor,
            ));
        }

        out
    }
}

/// Show only the first four characters of a secret
fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".to_string()
    } else if secret.chars().count() <= 4 {
        "***".to_string()
    } else {
        format!("{}***", secret.chars().take(4).collect::<String>())
    }
}
