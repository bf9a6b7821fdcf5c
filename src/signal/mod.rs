//! Telemetry signals: type aliases, erased export messages, and the
//! split/append/filter/partition algebra
//!
//! Every OTLP signal shares the same four-level tree: a resource envelope
//! wraps scopes, a scope wraps items (spans, metrics, log records), and
//! metric items wrap data points. The submodules reshape those trees without
//! changing the contents observed at any leaf.

pub mod logs;
pub mod metrics;
pub mod traces;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use logs::*;
pub use metrics::*;
pub use traces::*;

/// Result of a handler or middleware invocation.
pub type ExportResult<T> = Result<T, tonic::Status>;

pub type TracesRequest = ExportTraceServiceRequest;
pub type TracesResponse = ExportTraceServiceResponse;
pub type MetricsRequest = ExportMetricsServiceRequest;
pub type MetricsResponse = ExportMetricsServiceResponse;
pub type LogsRequest = ExportLogsServiceRequest;
pub type LogsResponse = ExportLogsServiceResponse;

/// Partition layout producing one bucket per year.
pub const YEARLY: &str = "%Y";
/// Partition layout producing one bucket per month.
pub const MONTHLY: &str = "%Y/%m";
/// Partition layout producing one bucket per day.
pub const DAILY: &str = "%Y/%m/%d";
/// Partition layout producing one bucket per hour.
pub const HOURLY: &str = "%Y/%m/%d/%H";

/// Convert nanoseconds since the Unix epoch to a UTC timestamp.
pub(crate) fn nanos_to_datetime(nanos: u64) -> DateTime<Utc> {
    let secs = (nanos / 1_000_000_000) as i64;
    let nsecs = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, nsecs).single().unwrap_or_else(|| {
        tracing::warn!(nanos, "invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Format a nanosecond timestamp with the given layout in the given zone.
///
/// A `None` zone means UTC.
pub(crate) fn format_nanos(nanos: u64, layout: &str, tz: Option<Tz>) -> String {
    let tz = tz.unwrap_or(Tz::UTC);
    nanos_to_datetime(nanos)
        .with_timezone(&tz)
        .format(layout)
        .to_string()
}

/// One of the three telemetry signals, at the type level.
///
/// The trait ties a signal name and HTTP path to its concrete export
/// request/response pair and to the erased [`ExportRequest`]/
/// [`ExportResponse`] representation used by cross-signal middleware.
pub trait Signal: Send + Sync + 'static {
    type Request: Message
        + Default
        + Clone
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type Response: Message
        + Default
        + Clone
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const NAME: &'static str;
    const HTTP_PATH: &'static str;

    fn request_into(request: Self::Request) -> ExportRequest;
    fn request_from(request: ExportRequest) -> Option<Self::Request>;
    fn response_into(response: Self::Response) -> ExportResponse;
    fn response_from(response: ExportResponse) -> Option<Self::Response>;
}

/// The traces signal.
pub enum Traces {}

/// The metrics signal.
pub enum Metrics {}

/// The logs signal.
pub enum Logs {}

impl Signal for Traces {
    type Request = TracesRequest;
    type Response = TracesResponse;

    const NAME: &'static str = "traces";
    const HTTP_PATH: &'static str = "/v1/traces";

    fn request_into(request: Self::Request) -> ExportRequest {
        ExportRequest::Traces(request)
    }

    fn request_from(request: ExportRequest) -> Option<Self::Request> {
        match request {
            ExportRequest::Traces(request) => Some(request),
            _ => None,
        }
    }

    fn response_into(response: Self::Response) -> ExportResponse {
        ExportResponse::Traces(response)
    }

    fn response_from(response: ExportResponse) -> Option<Self::Response> {
        match response {
            ExportResponse::Traces(response) => Some(response),
            _ => None,
        }
    }
}

impl Signal for Metrics {
    type Request = MetricsRequest;
    type Response = MetricsResponse;

    const NAME: &'static str = "metrics";
    const HTTP_PATH: &'static str = "/v1/metrics";

    fn request_into(request: Self::Request) -> ExportRequest {
        ExportRequest::Metrics(request)
    }

    fn request_from(request: ExportRequest) -> Option<Self::Request> {
        match request {
            ExportRequest::Metrics(request) => Some(request),
            _ => None,
        }
    }

    fn response_into(response: Self::Response) -> ExportResponse {
        ExportResponse::Metrics(response)
    }

    fn response_from(response: ExportResponse) -> Option<Self::Response> {
        match response {
            ExportResponse::Metrics(response) => Some(response),
            _ => None,
        }
    }
}

impl Signal for Logs {
    type Request = LogsRequest;
    type Response = LogsResponse;

    const NAME: &'static str = "logs";
    const HTTP_PATH: &'static str = "/v1/logs";

    fn request_into(request: Self::Request) -> ExportRequest {
        ExportRequest::Logs(request)
    }

    fn request_from(request: ExportRequest) -> Option<Self::Request> {
        match request {
            ExportRequest::Logs(request) => Some(request),
            _ => None,
        }
    }

    fn response_into(response: Self::Response) -> ExportResponse {
        ExportResponse::Logs(response)
    }

    fn response_from(response: ExportResponse) -> Option<Self::Response> {
        match response {
            ExportResponse::Logs(response) => Some(response),
            _ => None,
        }
    }
}

/// An export request of any signal, as seen by cross-signal middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    Traces(TracesRequest),
    Metrics(MetricsRequest),
    Logs(LogsRequest),
}

impl ExportRequest {
    pub fn signal_name(&self) -> &'static str {
        match self {
            ExportRequest::Traces(_) => Traces::NAME,
            ExportRequest::Metrics(_) => Metrics::NAME,
            ExportRequest::Logs(_) => Logs::NAME,
        }
    }

    /// Protobuf encoding of the inner message.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            ExportRequest::Traces(request) => request.encode_to_vec(),
            ExportRequest::Metrics(request) => request.encode_to_vec(),
            ExportRequest::Logs(request) => request.encode_to_vec(),
        }
    }
}

/// An export response of any signal, as returned through cross-signal
/// middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportResponse {
    Traces(TracesResponse),
    Metrics(MetricsResponse),
    Logs(LogsResponse),
}

impl ExportResponse {
    pub fn signal_name(&self) -> &'static str {
        match self {
            ExportResponse::Traces(_) => Traces::NAME,
            ExportResponse::Metrics(_) => Metrics::NAME,
            ExportResponse::Logs(_) => Logs::NAME,
        }
    }

    /// Protobuf encoding of the inner message.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            ExportResponse::Traces(response) => response.encode_to_vec(),
            ExportResponse::Metrics(response) => response.encode_to_vec(),
            ExportResponse::Logs(response) => response.encode_to_vec(),
        }
    }
}
