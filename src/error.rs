use std::time::Duration;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure confined to a single source for one tick.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open stream: {0}")]
    Open(#[source] BoxError),

    #[error("stream interrupted: {0}")]
    Read(#[source] BoxError),

    #[error("request failed: {0}")]
    Http(#[source] BoxError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed metric envelope: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SourceError {
    /// Whether the failure came from undecodable data rather than transport.
    pub fn is_parse(&self) -> bool {
        matches!(self, SourceError::Decode(_))
    }
}

/// A log line that could not be split into timestamp and level.
#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("missing level field")]
    MissingLevel,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to list pods in {namespace} with selector {selector}: {source}")]
    Enumeration {
        namespace: String,
        selector: String,
        #[source]
        source: BoxError,
    },
}
