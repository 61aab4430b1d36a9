//! The polling loop.
//!
//! Every tick re-lists the DNS pods, then tails each tracked container log and
//! polls each tracked metric from where the previous tick left off. Sources
//! are independent: one failing never holds up or discards the others.

use crate::clock::{Clock, TokioClock};
use crate::config::{EnumerationPolicy, MonitorConfig};
use crate::error::{BoxError, MonitorError, SourceError};
use crate::logs::{LogApi, LogTailer, TailReport};
use crate::metrics::{MetricPoller, MetricsApi, PollReport};
use crate::sink::EventSink;
use crate::types::{PodSummary, Source};
use crate::watermark::WatermarkStore;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods(&self, namespace: &str, selector: &str)
    -> Result<Vec<PodSummary>, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Terminated,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub pods: usize,
    pub sources: usize,
    pub failed_sources: usize,
    pub events: usize,
    pub samples: usize,
    pub malformed_lines: usize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub ticks: usize,
    pub failed_ticks: usize,
    pub failed_sources: usize,
    pub events: usize,
    pub samples: usize,
}

enum Outcome {
    Log(TailReport),
    Metric(Result<PollReport, SourceError>),
}

pub struct Monitor {
    config: MonitorConfig,
    pods: Arc<dyn PodLister>,
    tailer: LogTailer,
    poller: MetricPoller,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    store: WatermarkStore,
    state: LoopState,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        pods: Arc<dyn PodLister>,
        logs: Arc<dyn LogApi>,
        metrics: Arc<dyn MetricsApi>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let tailer = LogTailer::new(logs, config.fetch_timeout);
        let poller = MetricPoller::new(metrics, config.fetch_timeout);
        Self {
            config,
            pods,
            tailer,
            poller,
            sink,
            clock: Arc::new(TokioClock),
            store: WatermarkStore::new(),
            state: LoopState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn store(&self) -> &WatermarkStore {
        &self.store
    }

    /// Tick until `cancel` fires or the run-time budget is spent.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary, MonitorError> {
        let started = self.clock.now();
        let mut summary = RunSummary::default();

        if !self.config.initial_delay.is_zero() {
            debug!("Waiting {:?} before first tick", self.config.initial_delay);
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = self.clock.sleep(self.config.initial_delay) => false,
            };
            if cancelled {
                self.state = LoopState::Terminated;
                return Ok(summary);
            }
        }

        loop {
            if cancel.is_cancelled() {
                info!("Monitor cancelled");
                break;
            }
            if let Some(budget) = self.config.max_run_time
                && self.clock.now().duration_since(started) >= budget
            {
                info!("Run time of {:?} reached, stopping monitor", budget);
                break;
            }

            self.state = LoopState::Polling;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.tick() => Some(r),
            };
            self.state = LoopState::Idle;

            match result {
                None => {
                    info!("Monitor cancelled during tick");
                    break;
                }
                Some(Ok(report)) => {
                    summary.ticks += 1;
                    info!(
                        pods = report.pods,
                        sources = report.sources,
                        failed = report.failed_sources,
                        events = report.events,
                        samples = report.samples,
                        malformed = report.malformed_lines,
                        tracked = self.store.len(),
                        "Tick complete"
                    );
                    summary.failed_sources += report.failed_sources;
                    summary.events += report.events;
                    summary.samples += report.samples;
                }
                Some(Err(e)) => {
                    summary.ticks += 1;
                    summary.failed_ticks += 1;
                    error!(error = %e, "Tick failed");
                    if self.config.on_enumeration_error == EnumerationPolicy::Terminate {
                        self.state = LoopState::Terminated;
                        return Err(e);
                    }
                }
            }

            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = self.clock.sleep(self.config.interval) => false,
            };
            if cancelled {
                info!("Monitor cancelled");
                break;
            }
        }

        self.state = LoopState::Terminated;
        Ok(summary)
    }

    /// One pass over the current pod set.
    pub async fn tick(&self) -> Result<TickReport, MonitorError> {
        let cfg = &self.config;
        let pods = self
            .pods
            .list_pods(&cfg.namespace, &cfg.selector)
            .await
            .map_err(|source| MonitorError::Enumeration {
                namespace: cfg.namespace.clone(),
                selector: cfg.selector.clone(),
                source,
            })?;

        if pods.is_empty() {
            warn!(namespace = %cfg.namespace, selector = %cfg.selector, "No DNS pods are running!");
        } else {
            debug!("Total DNS pods: {}", pods.len());
        }
        for pod in &pods {
            debug!(pod = %pod.name, phase = %pod.phase, "DNS pod");
            for (container, restarts) in &pod.restarts {
                info!(pod = %pod.name, container = %container, restarts, "Container restart count");
            }
        }

        let sources = self.sources_for(&pods);
        let mut report = TickReport {
            pods: pods.len(),
            sources: sources.len(),
            ..Default::default()
        };

        let mut outcomes = stream::iter(sources)
            .map(|source| self.run_source(source))
            .buffer_unordered(cfg.concurrency.max(1));

        while let Some((source, outcome)) = outcomes.next().await {
            match outcome {
                Outcome::Log(tail) => {
                    debug!(
                        source = %source,
                        parsed = tail.parsed,
                        replayed = tail.replayed,
                        watermark = ?tail.watermark,
                        "Log tail done"
                    );
                    report.events += tail.events;
                    report.malformed_lines += tail.malformed;
                    if let Some(e) = tail.error {
                        report.failed_sources += 1;
                        warn!(source = %source, error = %e, "Log tail failed");
                    }
                }
                Outcome::Metric(Ok(poll)) => {
                    debug!(source = %source, samples = poll.samples, watermark = ?poll.watermark, "Metric poll done");
                    report.samples += poll.samples;
                }
                Outcome::Metric(Err(e)) => {
                    report.failed_sources += 1;
                    if e.is_parse() {
                        warn!(source = %source, error = %e, "Discarding undecodable metric response");
                    } else {
                        warn!(source = %source, error = %e, "Metric fetch failed");
                    }
                }
            }
        }

        Ok(report)
    }

    fn sources_for(&self, pods: &[PodSummary]) -> Vec<Source> {
        let mut sources = Vec::new();
        for pod in pods {
            for container in &self.config.containers {
                // Pods without a spec are tailed blindly.
                if pod.containers.is_empty() || pod.runs_container(container) {
                    sources.push(Source::log(&pod.name, container));
                } else {
                    debug!(pod = %pod.name, container = %container, "Container not present, skipping");
                }
            }
            for metric in &self.config.metrics {
                sources.push(Source::metric(&pod.name, metric));
            }
        }
        sources
    }

    async fn run_source(&self, source: Source) -> (Source, Outcome) {
        let outcome = match source {
            Source::Log { .. } => {
                Outcome::Log(self.tailer.tail(&source, &self.store, self.sink.as_ref()).await)
            }
            Source::Metric { .. } => Outcome::Metric(
                self.poller
                    .poll(&source, &self.store, self.sink.as_ref())
                    .await,
            ),
        };
        (source, outcome)
    }
}
