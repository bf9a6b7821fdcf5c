//! Client error types
//!
//! Partial success is deliberately a typed, inspectable error: the nominal
//! result of an upload that the server partially rejected is "an error
//! occurred; inspect it", and inspection yields the full response so upper
//! layers can recover the unrejected items. Nothing is retried at this
//! layer.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::signal::{LogsResponse, MetricsResponse, TracesResponse};

/// Validation failure during client construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("protocol {0:?} is not allowed")]
    Protocol(String),
    #[error("endpoint parse error: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("endpoint scheme {0:?} is not allowed")]
    Scheme(String),
    #[error("endpoint has no host")]
    MissingHost,
    #[error("{0} endpoint is required")]
    MissingEndpoint(&'static str),
    #[error("header {0:?} is invalid")]
    Header(String),
    #[error("{var} parse error: {reason}")]
    Env { var: String, reason: String },
}

/// Lifecycle failure of [`Client::start`](crate::Client::start) or
/// [`Client::stop`](crate::Client::stop).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("already closed")]
    AlreadyClosed,
    #[error("stop canceled before shutdown completed")]
    Canceled,
    #[error("failed to connect {signal} channel: {source}")]
    Connect {
        signal: &'static str,
        #[source]
        source: tonic::transport::Error,
    },
}

/// Failure of a single upload call.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("client not started")]
    NotStarted,
    #[error(transparent)]
    Grpc(#[from] tonic::Status),
    #[error("export timed out after {0:?}")]
    Timeout(Duration),
    #[error("export canceled by client shutdown")]
    Canceled,
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
    #[error("unexpected content type: {0:?}")]
    UnexpectedContentType(String),
    #[error("failed to encode request: {0}")]
    Encode(#[from] crate::codec::json::JsonCodecError),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("header {0:?} is invalid")]
    InvalidHeader(String),
    #[error(transparent)]
    PartialSuccess(#[from] PartialSuccess),
}

impl UploadError {
    /// The partial-success payload, when the server rejected a subset of the
    /// submitted items.
    pub fn partial_success(&self) -> Option<&PartialSuccess> {
        match self {
            UploadError::PartialSuccess(partial) => Some(partial),
            _ => None,
        }
    }
}

/// Per-signal partial-success payloads.
#[derive(Debug, Clone)]
pub enum PartialSuccess {
    Traces(TracesPartialSuccess),
    Metrics(MetricsPartialSuccess),
    Logs(LogsPartialSuccess),
}

impl fmt::Display for PartialSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialSuccess::Traces(partial) => partial.fmt(f),
            PartialSuccess::Metrics(partial) => partial.fmt(f),
            PartialSuccess::Logs(partial) => partial.fmt(f),
        }
    }
}

impl std::error::Error for PartialSuccess {}

/// Trace upload partially rejected; carries the full response.
#[derive(Debug, Clone)]
pub struct TracesPartialSuccess {
    response: TracesResponse,
}

impl TracesPartialSuccess {
    pub(crate) fn new(response: TracesResponse) -> Self {
        Self { response }
    }

    pub fn response(&self) -> &TracesResponse {
        &self.response
    }

    pub fn rejected_spans(&self) -> i64 {
        self.response
            .partial_success
            .as_ref()
            .map(|p| p.rejected_spans)
            .unwrap_or(0)
    }

    pub fn error_message(&self) -> &str {
        self.response
            .partial_success
            .as_ref()
            .map(|p| p.error_message.as_str())
            .unwrap_or("")
    }
}

impl fmt::Display for TracesPartialSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to export {} spans: {}",
            self.rejected_spans(),
            self.error_message()
        )
    }
}

/// Metrics upload partially rejected; carries the full response.
#[derive(Debug, Clone)]
pub struct MetricsPartialSuccess {
    response: MetricsResponse,
}

impl MetricsPartialSuccess {
    pub(crate) fn new(response: MetricsResponse) -> Self {
        Self { response }
    }

    pub fn response(&self) -> &MetricsResponse {
        &self.response
    }

    pub fn rejected_data_points(&self) -> i64 {
        self.response
            .partial_success
            .as_ref()
            .map(|p| p.rejected_data_points)
            .unwrap_or(0)
    }

    pub fn error_message(&self) -> &str {
        self.response
            .partial_success
            .as_ref()
            .map(|p| p.error_message.as_str())
            .unwrap_or("")
    }
}

impl fmt::Display for MetricsPartialSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to export {} metrics: {}",
            self.rejected_data_points(),
            self.error_message()
        )
    }
}

/// Logs upload partially rejected; carries the full response.
#[derive(Debug, Clone)]
pub struct LogsPartialSuccess {
    response: LogsResponse,
}

impl LogsPartialSuccess {
    pub(crate) fn new(response: LogsResponse) -> Self {
        Self { response }
    }

    pub fn response(&self) -> &LogsResponse {
        &self.response
    }

    pub fn rejected_log_records(&self) -> i64 {
        self.response
            .partial_success
            .as_ref()
            .map(|p| p.rejected_log_records)
            .unwrap_or(0)
    }

    pub fn error_message(&self) -> &str {
        self.response
            .partial_success
            .as_ref()
            .map(|p| p.error_message.as_str())
            .unwrap_or("")
    }
}

impl fmt::Display for LogsPartialSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to export {} logs: {}",
            self.rejected_log_records(),
            self.error_message()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTracePartialSuccess;

    #[test]
    fn test_partial_success_display_and_accessors() {
        let partial = TracesPartialSuccess::new(TracesResponse {
            partial_success: Some(ExportTracePartialSuccess {
                rejected_spans: 3,
                error_message: "quota exceeded".to_string(),
            }),
        });
        assert_eq!(partial.rejected_spans(), 3);
        assert_eq!(partial.error_message(), "quota exceeded");
        assert_eq!(
            partial.to_string(),
            "failed to export 3 spans: quota exceeded"
        );
    }

    #[test]
    fn test_upload_error_exposes_partial_success() {
        let partial = PartialSuccess::Traces(TracesPartialSuccess::new(TracesResponse {
            partial_success: Some(ExportTracePartialSuccess::default()),
        }));
        let error = UploadError::from(partial);
        assert!(error.partial_success().is_some());

        let other = UploadError::NotStarted;
        assert!(other.partial_success().is_none());
        assert_eq!(other.to_string(), "client not started");
    }
}
