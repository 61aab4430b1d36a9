use crate::cli::MonitorArgs;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "kube-system";
pub const DEFAULT_SELECTOR: &str = "k8s-app=kube-dns";
pub const DEFAULT_CONTAINERS: &[&str] = &["kubedns", "dnsmasq", "sidecar"];
pub const DEFAULT_METRICS: &[&str] = &[
    "network/rx_rate",
    "network/rx_errors",
    "network/tx_rate",
    "network/tx_errors",
    "cpu/usage_rate",
    "memory/usage",
];
pub const DEFAULT_HEAPSTER_URL: &str = "http://localhost:8001/api/v1/namespaces/kube-system/services/heapster/proxy/api/v1/model/namespaces/kube-system";

/// What to do when the pod listing fails at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationPolicy {
    /// Report and wait for the next tick.
    #[default]
    Retry,
    /// Stop the loop with the error.
    Terminate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub namespace: String,
    pub selector: String,
    pub containers: Vec<String>,
    pub metrics: Vec<String>,
    pub interval: Duration,
    pub initial_delay: Duration,
    /// `None` runs until cancelled.
    pub max_run_time: Option<Duration>,
    pub fetch_timeout: Duration,
    pub concurrency: usize,
    pub heapster_url: String,
    pub on_enumeration_error: EnumerationPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            selector: DEFAULT_SELECTOR.to_string(),
            containers: DEFAULT_CONTAINERS.iter().map(|s| s.to_string()).collect(),
            metrics: DEFAULT_METRICS.iter().map(|s| s.to_string()).collect(),
            interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(10),
            max_run_time: Some(Duration::from_secs(3 * 60 * 60)),
            fetch_timeout: Duration::from_secs(30),
            concurrency: 8,
            heapster_url: DEFAULT_HEAPSTER_URL.to_string(),
            on_enumeration_error: EnumerationPolicy::Retry,
        }
    }
}

/// On-disk form of [`MonitorConfig`]. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub namespace: Option<String>,
    pub selector: Option<String>,
    pub containers: Option<Vec<String>>,
    pub metrics: Option<Vec<String>>,
    pub interval_secs: Option<u64>,
    pub initial_delay_secs: Option<u64>,
    /// 0 disables the budget.
    pub max_run_time_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub heapster_url: Option<String>,
    pub on_enumeration_error: Option<EnumerationPolicy>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

impl MonitorConfig {
    /// Layer command line over file over defaults.
    pub fn resolve(file: FileConfig, args: &MonitorArgs) -> anyhow::Result<Self> {
        let mut cfg = MonitorConfig::default();

        macro_rules! layer {
            ($field:ident, $file:expr, $arg:expr) => {
                if let Some(v) = $arg.or($file) {
                    cfg.$field = v;
                }
            };
        }

        layer!(namespace, file.namespace, args.namespace.clone());
        layer!(selector, file.selector, args.selector.clone());
        layer!(heapster_url, file.heapster_url, args.heapster_url.clone());
        layer!(concurrency, file.concurrency, args.concurrency);
        layer!(
            on_enumeration_error,
            file.on_enumeration_error,
            args.on_enumeration_error
        );

        if let Some(v) = non_empty(args.containers.clone()).or(file.containers) {
            cfg.containers = v;
        }
        if let Some(v) = non_empty(args.metrics.clone()).or(file.metrics) {
            cfg.metrics = v;
        }
        if args.no_metrics {
            cfg.metrics.clear();
        }

        if let Some(secs) = args.interval.or(file.interval_secs) {
            cfg.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = args.initial_delay.or(file.initial_delay_secs) {
            cfg.initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = args.fetch_timeout.or(file.fetch_timeout_secs) {
            cfg.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = args.max_run_time.or(file.max_run_time_secs) {
            cfg.max_run_time = (secs > 0).then(|| Duration::from_secs(secs));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        if self.selector.is_empty() {
            anyhow::bail!("label selector must not be empty");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.interval.is_zero() {
            anyhow::bail!("interval must be greater than zero");
        }
        if self.fetch_timeout.is_zero() {
            anyhow::bail!("fetch timeout must be greater than zero");
        }
        Ok(())
    }
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    (!v.is_empty()).then_some(v)
}
