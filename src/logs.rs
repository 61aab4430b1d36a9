//! Incremental container log tailing.
//!
//! Each call to [`LogTailer::tail`] reads one bounded window of a container's
//! log starting at the stored watermark, reports W/E/F lines and moves the
//! watermark to the last line it could parse.

use crate::classify::classify;
use crate::error::{LineError, SourceError};
use crate::sink::EventSink;
use crate::types::{HealthEvent, Severity, Source, Watermark};
use crate::watermark::WatermarkStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Receives raw log lines in stream order.
pub trait LineVisitor: Send {
    fn visit(&mut self, line: &str);
}

#[async_trait]
pub trait LogApi: Send + Sync {
    /// Stream a container log with timestamps, starting at `since` if given,
    /// handing every line to `visitor` until the stream ends.
    async fn stream_log(
        &self,
        pod: &str,
        container: &str,
        since: Option<Watermark>,
        visitor: &mut dyn LineVisitor,
    ) -> Result<(), SourceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine<'a> {
    pub timestamp: DateTime<Utc>,
    pub level_code: &'a str,
    pub message: &'a str,
}

/// Split `<RFC3339 timestamp> <level...> <message>`.
pub fn parse_line(line: &str) -> Result<LogLine<'_>, LineError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(LineError::MissingTimestamp);
    }
    let (ts, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let timestamp = DateTime::parse_from_rfc3339(ts)
        .map_err(|_| LineError::InvalidTimestamp(ts.to_string()))?
        .with_timezone(&Utc);

    let rest = rest.trim_start();
    let (level, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let first = level.chars().next().ok_or(LineError::MissingLevel)?;

    Ok(LogLine {
        timestamp,
        level_code: &level[..first.len_utf8()],
        message: message.trim(),
    })
}

#[derive(Debug, Default)]
pub struct TailReport {
    /// Lines parsed past the previous watermark.
    pub parsed: usize,
    pub malformed: usize,
    /// Lines at or before the previous watermark, re-sent by the inclusive window.
    pub replayed: usize,
    pub events: usize,
    pub watermark: Option<Watermark>,
    pub error: Option<SourceError>,
}

struct TailState<'a> {
    source: &'a Source,
    since: Option<Watermark>,
    sink: &'a dyn EventSink,
    last_parsed: Option<Watermark>,
    report: TailReport,
}

impl LineVisitor for TailState<'_> {
    fn visit(&mut self, line: &str) {
        let parsed = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.report.malformed += 1;
                debug!(source = %self.source, error = %e, "Skipping malformed log line");
                return;
            }
        };

        if self.since.is_some_and(|w| parsed.timestamp <= w) {
            self.report.replayed += 1;
            return;
        }

        self.report.parsed += 1;
        self.last_parsed = Some(parsed.timestamp);

        let severity = classify(parsed.level_code);
        if severity == Severity::Ignored {
            return;
        }
        self.report.events += 1;
        self.sink.emit_event(HealthEvent {
            source: self.source.clone(),
            severity,
            timestamp: parsed.timestamp,
            message: parsed.message.to_string(),
        });
    }
}

pub struct LogTailer {
    api: Arc<dyn LogApi>,
    fetch_timeout: Duration,
}

impl LogTailer {
    pub fn new(api: Arc<dyn LogApi>, fetch_timeout: Duration) -> Self {
        Self { api, fetch_timeout }
    }

    /// Tail one container log from its watermark. Never fails as a whole:
    /// transport problems end up in [`TailReport::error`] and whatever was
    /// read before them still counts.
    pub async fn tail(
        &self,
        source: &Source,
        store: &WatermarkStore,
        sink: &dyn EventSink,
    ) -> TailReport {
        let Source::Log { pod, container } = source else {
            warn!(source = %source, "Not a log source, skipping");
            return TailReport::default();
        };

        let since = store.get(source);
        let mut state = TailState {
            source,
            since,
            sink,
            last_parsed: None,
            report: TailReport::default(),
        };

        let result = tokio::time::timeout(
            self.fetch_timeout,
            self.api.stream_log(pod, container, since, &mut state),
        )
        .await;

        let mut report = state.report;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report.error = Some(e),
            Err(_) => report.error = Some(SourceError::Timeout(self.fetch_timeout)),
        }

        if let Some(last) = state.last_parsed {
            store.advance(source, last);
        }
        report.watermark = store.get(source);
        report
    }
}
