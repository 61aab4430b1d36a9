use crate::error::SourceError;
use crate::sink::EventSink;
use crate::types::{MetricSample, Source, Watermark};
use crate::watermark::WatermarkStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// Fetch the raw JSON envelope for one pod metric, from `start` if given.
    async fn fetch_metric(
        &self,
        pod: &str,
        metric: &str,
        start: Option<Watermark>,
    ) -> Result<String, SourceError>;
}

/// Response body of the heapster model API for a single metric.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricEnvelope {
    pub metrics: Vec<RawSample>,
    pub latest_timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricEnvelope {
    pub fn decode(body: &str) -> Result<Self, SourceError> {
        Ok(serde_json::from_str(body)?)
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct PollReport {
    pub samples: usize,
    /// `None` when nothing was fetched.
    pub watermark: Option<Watermark>,
}

pub struct MetricPoller {
    api: Arc<dyn MetricsApi>,
    fetch_timeout: Duration,
}

impl MetricPoller {
    pub fn new(api: Arc<dyn MetricsApi>, fetch_timeout: Duration) -> Self {
        Self { api, fetch_timeout }
    }

    /// Fetch everything since the stored watermark and emit it. The watermark
    /// then moves to the server's `latestTimestamp`, even for an empty window.
    /// On any error nothing is emitted and the watermark is left alone.
    pub async fn poll(
        &self,
        source: &Source,
        store: &WatermarkStore,
        sink: &dyn EventSink,
    ) -> Result<PollReport, SourceError> {
        let Source::Metric { pod, metric } = source else {
            warn!(source = %source, "Not a metric source, skipping");
            return Ok(PollReport::default());
        };

        let start = store.get(source);
        let body = tokio::time::timeout(
            self.fetch_timeout,
            self.api.fetch_metric(pod, metric, start),
        )
        .await
        .map_err(|_| SourceError::Timeout(self.fetch_timeout))??;

        let envelope = MetricEnvelope::decode(&body)?;

        let samples = envelope.metrics.len();
        for raw in envelope.metrics {
            sink.emit_sample(MetricSample {
                source: source.clone(),
                timestamp: raw.timestamp,
                value: raw.value,
            });
        }

        store.set(source, envelope.latest_timestamp);
        Ok(PollReport {
            samples,
            watermark: Some(envelope.latest_timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMetrics, RecordingSink, ts};

    fn poller(api: Arc<FakeMetrics>) -> MetricPoller {
        MetricPoller::new(api, Duration::from_secs(5))
    }

    #[test]
    fn test_decode_envelope() {
        let env = MetricEnvelope::decode(
            r#"{"metrics":[{"timestamp":"2021-01-01T00:01:00Z","value":1024}],
                "latestTimestamp":"2021-01-01T00:01:00Z"}"#,
        )
        .unwrap();
        assert_eq!(env.metrics.len(), 1);
        assert_eq!(env.metrics[0].value, 1024.0);
        assert_eq!(env.latest_timestamp, ts("2021-01-01T00:01:00Z"));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        for body in [
            r#"{"metrics":[]}"#,
            r#"{"latestTimestamp":"2021-01-01T00:01:00Z"}"#,
            r#"{"metrics":{},"latestTimestamp":"2021-01-01T00:01:00Z"}"#,
            r#"{"metrics":[],"latestTimestamp":"later"}"#,
            "not json",
        ] {
            let err = MetricEnvelope::decode(body).unwrap_err();
            assert!(err.is_parse(), "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn test_empty_window_still_advances() {
        let api = Arc::new(FakeMetrics::default());
        api.respond(
            "kube-dns-1",
            "cpu/usage_rate",
            r#"{"metrics":[],"latestTimestamp":"2021-01-01T00:05:00Z"}"#,
        );
        let src = Source::metric("kube-dns-1", "cpu/usage_rate");
        let store = WatermarkStore::new();
        let sink = RecordingSink::default();

        let report = poller(api).poll(&src, &store, &sink).await.unwrap();

        assert_eq!(report.samples, 0);
        assert_eq!(report.watermark, Some(ts("2021-01-01T00:05:00Z")));
        assert!(sink.samples().is_empty());
        assert_eq!(store.get(&src), Some(ts("2021-01-01T00:05:00Z")));
    }

    #[tokio::test]
    async fn test_watermark_from_envelope_not_samples() {
        let api = Arc::new(FakeMetrics::default());
        api.respond(
            "kube-dns-1",
            "memory/usage",
            r#"{"metrics":[
                {"timestamp":"2021-01-01T00:09:00Z","value":3},
                {"timestamp":"2021-01-01T00:01:00Z","value":1}
              ],
              "latestTimestamp":"2021-01-01T00:06:00Z"}"#,
        );
        let src = Source::metric("kube-dns-1", "memory/usage");
        let store = WatermarkStore::new();
        let sink = RecordingSink::default();

        poller(api.clone()).poll(&src, &store, &sink).await.unwrap();

        assert_eq!(sink.samples().len(), 2);
        assert_eq!(sink.samples()[1].value, 1.0);
        assert_eq!(store.get(&src), Some(ts("2021-01-01T00:06:00Z")));
        assert_eq!(api.starts(), vec![None]);
    }

    #[tokio::test]
    async fn test_start_uses_watermark() {
        let api = Arc::new(FakeMetrics::default());
        api.respond(
            "kube-dns-1",
            "network/rx_rate",
            r#"{"metrics":[],"latestTimestamp":"2021-01-01T00:07:00Z"}"#,
        );
        let src = Source::metric("kube-dns-1", "network/rx_rate");
        let store = WatermarkStore::new();
        store.set(&src, ts("2021-01-01T00:05:00Z"));
        let sink = RecordingSink::default();

        poller(api.clone()).poll(&src, &store, &sink).await.unwrap();

        assert_eq!(api.starts(), vec![Some(ts("2021-01-01T00:05:00Z"))]);
        assert_eq!(store.get(&src), Some(ts("2021-01-01T00:07:00Z")));
    }

    #[tokio::test]
    async fn test_decode_failure_discards_fetch() {
        let api = Arc::new(FakeMetrics::default());
        api.respond(
            "kube-dns-1",
            "network/tx_errors",
            r#"{"metrics":[{"timestamp":"2021-01-01T00:01:00Z","value":1}]}"#,
        );
        let src = Source::metric("kube-dns-1", "network/tx_errors");
        let store = WatermarkStore::new();
        store.set(&src, ts("2021-01-01T00:00:00Z"));
        let sink = RecordingSink::default();

        let err = poller(api).poll(&src, &store, &sink).await.unwrap_err();

        assert!(err.is_parse());
        assert!(sink.samples().is_empty());
        assert_eq!(store.get(&src), Some(ts("2021-01-01T00:00:00Z")));
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_watermark() {
        let api = Arc::new(FakeMetrics::default());
        let src = Source::metric("kube-dns-1", "network/tx_rate");
        let store = WatermarkStore::new();
        let sink = RecordingSink::default();

        let err = poller(api).poll(&src, &store, &sink).await.unwrap_err();

        assert!(matches!(err, SourceError::Http(_)));
        assert_eq!(store.get(&src), None);
    }

    #[tokio::test]
    async fn test_log_source_is_skipped() {
        let api = Arc::new(FakeMetrics::default());
        let src = Source::log("kube-dns-1", "kubedns");
        let store = WatermarkStore::new();
        store.set(&src, ts("2021-01-01T00:00:00Z"));
        let sink = RecordingSink::default();

        let report = poller(api.clone()).poll(&src, &store, &sink).await.unwrap();

        assert_eq!(report.samples, 0);
        assert_eq!(report.watermark, None);
        assert!(api.starts().is_empty());
        assert_eq!(store.get(&src), Some(ts("2021-01-01T00:00:00Z")));
    }
}
