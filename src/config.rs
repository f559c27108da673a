use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the flowwatch agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Flow collectors to poll.
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,

    /// Status reconciliation configuration.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Alert sink configuration.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Health and query HTTP server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// One flow collector to poll.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Collector identifier used in samples, logs, and metrics.
    pub name: String,

    /// HTTP(S) endpoint serving the stats document.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Local path to the stats document (retrieved out of band).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How often to poll this collector. Default: 60s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-poll timeout. Default: 10s.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Status reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// How often queued batches are merged and re-decided. Default: 60s.
    #[serde(default = "default_cycle_interval", with = "humantime_serde")]
    pub cycle_interval: Duration,

    /// How long a sample keeps masking or deciding after it was
    /// observed. Bounds failover masking. Default: 90s.
    #[serde(default = "default_freshness_window", with = "humantime_serde")]
    pub freshness_window: Duration,
}

/// Alert sink configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Structured log sink.
    #[serde(default)]
    pub log: LogAlertConfig,

    /// Persistent CSV journal of status changes.
    #[serde(default)]
    pub csv: CsvAlertConfig,

    /// Webhook sink posting transitions as JSON.
    #[serde(default)]
    pub webhook: WebhookAlertConfig,
}

/// Structured log sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LogAlertConfig {
    /// Enabled by default.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// CSV journal sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvAlertConfig {
    /// Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Journal file path. Default: "status_changes.csv".
    #[serde(default = "default_csv_path")]
    pub path: PathBuf,
}

/// Webhook sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookAlertConfig {
    /// Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Endpoint receiving transition payloads.
    #[serde(default)]
    pub url: String,

    /// Per-post timeout. Default: 10s.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Health and query HTTP server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_freshness_window() -> Duration {
    Duration::from_secs(90)
}

fn default_true() -> bool {
    true
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("status_changes.csv")
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            collectors: Vec::new(),
            aggregation: AggregationConfig::default(),
            alerts: AlertsConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cycle_interval: default_cycle_interval(),
            freshness_window: default_freshness_window(),
        }
    }
}

impl Default for LogAlertConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for CsvAlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_csv_path(),
        }
    }
}

impl Default for WebhookAlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout: default_poll_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate semantic constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.collectors.is_empty() {
            bail!("at least one collector must be configured");
        }

        let mut names = HashSet::new();
        for collector in &self.collectors {
            if collector.name.is_empty() {
                bail!("collector name must not be empty");
            }

            if !names.insert(collector.name.as_str()) {
                bail!("duplicate collector name {:?}", collector.name);
            }

            match (&collector.endpoint, &collector.path) {
                (Some(_), Some(_)) => bail!(
                    "collector {:?} configures both endpoint and path",
                    collector.name
                ),
                (None, None) => bail!(
                    "collector {:?} configures neither endpoint nor path",
                    collector.name
                ),
                _ => {}
            }

            if collector.poll_interval.is_zero() {
                bail!("collector {:?} poll_interval must be > 0", collector.name);
            }
        }

        if self.aggregation.cycle_interval.is_zero() {
            bail!("aggregation.cycle_interval must be > 0");
        }

        if self.aggregation.freshness_window.is_zero() {
            bail!("aggregation.freshness_window must be > 0");
        }

        if self.alerts.webhook.enabled && self.alerts.webhook.url.is_empty() {
            bail!("alerts.webhook.url is required when the webhook sink is enabled");
        }

        if self.alerts.csv.enabled && self.alerts.csv.path.as_os_str().is_empty() {
            bail!("alerts.csv.path is required when the CSV sink is enabled");
        }

        Ok(())
    }
}
