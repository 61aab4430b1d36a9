//! In-memory collaborators for unit tests.

use crate::clock::Clock;
use crate::error::{BoxError, SourceError};
use crate::logs::{LineVisitor, LogApi, parse_line};
use crate::monitor::PodLister;
use crate::sink::EventSink;
use crate::types::{HealthEvent, MetricSample, PodSummary, Watermark};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn pod(name: &str, containers: &[&str]) -> PodSummary {
    PodSummary {
        name: name.to_string(),
        containers: containers.iter().map(|c| c.to_string()).collect(),
        phase: "Running".to_string(),
        restarts: containers.iter().map(|c| (c.to_string(), 0)).collect(),
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HealthEvent>>,
    samples: Mutex<Vec<MetricSample>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit_event(&self, event: HealthEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn emit_sample(&self, sample: MetricSample) {
        self.samples.lock().unwrap().push(sample);
    }
}

/// Container logs keyed by `pod/container`. Serves every line at or after
/// `since`, like the inclusive kubelet window.
#[derive(Default)]
pub struct FakeLogs {
    lines: Mutex<HashMap<String, Vec<String>>>,
    failing_open: Mutex<HashSet<String>>,
    failing_read: Mutex<HashSet<String>>,
    stalling: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, Option<Watermark>)>>,
}

impl FakeLogs {
    fn key(pod: &str, container: &str) -> String {
        format!("{}/{}", pod, container)
    }

    pub fn push_lines(&self, pod: &str, container: &str, lines: &[&str]) {
        self.lines
            .lock()
            .unwrap()
            .entry(Self::key(pod, container))
            .or_default()
            .extend(lines.iter().map(|l| l.to_string()));
    }

    pub fn fail_open(&self, pod: &str, container: &str) {
        self.failing_open
            .lock()
            .unwrap()
            .insert(Self::key(pod, container));
    }

    pub fn fail_after_lines(&self, pod: &str, container: &str) {
        self.failing_read
            .lock()
            .unwrap()
            .insert(Self::key(pod, container));
    }

    pub fn stall(&self, pod: &str, container: &str) {
        self.stalling
            .lock()
            .unwrap()
            .insert(Self::key(pod, container));
    }

    pub fn requests(&self) -> Vec<(String, Option<Watermark>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogApi for FakeLogs {
    async fn stream_log(
        &self,
        pod: &str,
        container: &str,
        since: Option<Watermark>,
        visitor: &mut dyn LineVisitor,
    ) -> Result<(), SourceError> {
        let key = Self::key(pod, container);
        self.requests.lock().unwrap().push((key.clone(), since));

        let refuses = self.failing_open.lock().unwrap().contains(&key);
        if refuses {
            return Err(SourceError::Open("connection refused".into()));
        }

        let lines = self
            .lines
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        for line in lines {
            let in_window = match (since, parse_line(&line)) {
                (Some(since), Ok(parsed)) => parsed.timestamp >= since,
                _ => true,
            };
            if in_window {
                visitor.visit(&line);
            }
        }

        let fails = self.failing_read.lock().unwrap().contains(&key);
        let stalls = self.stalling.lock().unwrap().contains(&key);
        if fails {
            return Err(SourceError::Read("connection reset".into()));
        }
        if stalls {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Canned metric bodies keyed by `pod/metric`; unknown keys fail like an
/// unreachable heapster.
#[derive(Default)]
pub struct FakeMetrics {
    bodies: Mutex<HashMap<String, String>>,
    starts: Mutex<Vec<Option<Watermark>>>,
}

impl FakeMetrics {
    pub fn respond(&self, pod: &str, metric: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(format!("{}/{}", pod, metric), body.to_string());
    }

    pub fn starts(&self) -> Vec<Option<Watermark>> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl crate::metrics::MetricsApi for FakeMetrics {
    async fn fetch_metric(
        &self,
        pod: &str,
        metric: &str,
        start: Option<Watermark>,
    ) -> Result<String, SourceError> {
        self.starts.lock().unwrap().push(start);
        self.bodies
            .lock()
            .unwrap()
            .get(&format!("{}/{}", pod, metric))
            .cloned()
            .ok_or_else(|| SourceError::Http("503 Service Unavailable".into()))
    }
}

/// Returns queued listings in order, then empty pod sets.
#[derive(Default)]
pub struct FakePods {
    responses: Mutex<VecDeque<Result<Vec<PodSummary>, BoxError>>>,
    calls: Mutex<usize>,
    cancel: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakePods {
    pub fn push(&self, response: Result<Vec<PodSummary>, BoxError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// Fire `token` during the `n`th listing, which then stays pending once.
    pub fn cancel_on_call(&self, n: usize, token: CancellationToken) {
        *self.cancel.lock().unwrap() = Some((n, token));
    }
}

#[async_trait]
impl PodLister for FakePods {
    async fn list_pods(
        &self,
        _namespace: &str,
        _selector: &str,
    ) -> Result<Vec<PodSummary>, BoxError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        let token = match self.cancel.lock().unwrap().as_ref() {
            Some((n, token)) if *n == call => Some(token.clone()),
            _ => None,
        };
        if let Some(token) = token {
            // Fire mid-listing and give the caller a chance to notice.
            token.cancel();
            tokio::task::yield_now().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Clock whose sleeps return at once after moving time forward.
pub struct ManualClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        {
            *self.now.lock().unwrap() += duration;
            self.sleeps.lock().unwrap().push(duration);
        }
        tokio::task::yield_now().await;
    }
}
