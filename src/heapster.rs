use crate::error::SourceError;
use crate::metrics::MetricsApi;
use crate::types::Watermark;
use anyhow::Context;
use async_trait::async_trait;
use chrono::SecondsFormat;
use std::time::Duration;
use tracing::debug;

/// Client for the heapster model API of one namespace.
#[derive(Clone)]
pub struct HeapsterClient {
    base_url: String,
    client: reqwest::Client,
}

impl HeapsterClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// GET for one pod metric. `start` goes through the query encoder.
    pub fn metric_request(
        &self,
        pod: &str,
        metric: &str,
        start: Option<Watermark>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}/pods/{}/metrics/{}", self.base_url, pod, metric);
        let request = self.client.get(url);
        match start {
            Some(start) => {
                request.query(&[("start", start.to_rfc3339_opts(SecondsFormat::AutoSi, true))])
            }
            None => request,
        }
    }
}

#[async_trait]
impl MetricsApi for HeapsterClient {
    async fn fetch_metric(
        &self,
        pod: &str,
        metric: &str,
        start: Option<Watermark>,
    ) -> Result<String, SourceError> {
        debug!(pod = %pod, metric = %metric, start = ?start, "Fetching metric");
        self.metric_request(pod, metric, start)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| SourceError::Http(Box::new(e)))?
            .text()
            .await
            .map_err(|e| SourceError::Read(Box::new(e)))
    }
}
