use chrono::{DateTime, Utc};
use std::fmt;

/// Resumption point for a source.
pub type Watermark = DateTime<Utc>;

/// Identity of one independently tailed stream.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Source {
    Log { pod: String, container: String },
    Metric { pod: String, metric: String },
}

impl Source {
    pub fn log(pod: impl Into<String>, container: impl Into<String>) -> Self {
        Source::Log {
            pod: pod.into(),
            container: container.into(),
        }
    }

    pub fn metric(pod: impl Into<String>, metric: impl Into<String>) -> Self {
        Source::Metric {
            pod: pod.into(),
            metric: metric.into(),
        }
    }

    pub fn pod(&self) -> &str {
        match self {
            Source::Log { pod, .. } | Source::Metric { pod, .. } => pod,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Log { pod, container } => write!(f, "{}/{}", pod, container),
            Source::Metric { pod, metric } => write!(f, "{}:{}", pod, metric),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warning,
    Error,
    Fail,
    Ignored,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fail => "Fail",
            Severity::Ignored => "Ignored",
        };
        f.write_str(s)
    }
}

/// A classified log line worth reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthEvent {
    pub source: Source,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Point-in-time view of a DNS pod, rebuilt every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodSummary {
    pub name: String,
    pub containers: Vec<String>,
    pub phase: String,
    /// Restart count per container status.
    pub restarts: Vec<(String, i32)>,
}

impl PodSummary {
    pub fn runs_container(&self, container: &str) -> bool {
        self.containers.iter().any(|c| c == container)
    }
}
