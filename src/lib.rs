//! OTLP conduit: server and client plumbing for the OpenTelemetry Protocol.
//!
//! This crate implements both halves of OTLP for the three telemetry signals
//! (traces, metrics, logs) over two transports:
//!
//! - [`ServerMux`] accepts one handler registration per signal and serves it
//!   simultaneously over gRPC and HTTP (protobuf or JSON bodies), with
//!   per-signal and cross-signal middleware chains sharing a single
//!   [`Context`] contract.
//! - [`Client`] presents one upload call per signal and multiplexes each call
//!   onto a long-lived gRPC channel (interned by connection fingerprint) or a
//!   short-lived HTTP request, surfacing partial success as a typed error.
//! - [`codec::json`] marshals OTLP messages to and from the OTLP/JSON wire
//!   convention (hex-encoded trace/span identifiers).
//! - [`signal`] provides the split/append/filter/partition algebra over the
//!   resource/scope/item telemetry trees.
//!
//! The crate is a conduit and transformation library: it does not persist,
//! queue, retry, sample, or aggregate telemetry.

pub mod client;
pub mod codec;
pub mod server;
pub mod signal;
pub mod testing;

pub use client::{
    Client, ClientConfig, ClientError, ConfigError, LogsPartialSuccess, MetricsPartialSuccess,
    PartialSuccess, Protocol, SignalConfig, TracesPartialSuccess, UploadError,
};
pub use codec::json::{
    marshal_json, marshal_json_pretty, unmarshal_json, JsonCodecError, JsonDecoder, JsonEncoder,
};
pub use codec::ContentType;
pub use server::{
    export_handler, grpc_code_to_http_status, handler_fn, Context, EntryHandle, ExportHandler,
    ExportLayer, Handler, ServerMux, SignalHandler, SignalLayer,
};
pub use signal::{
    ExportRequest, ExportResponse, ExportResult, Logs, LogsRequest, LogsResponse, Metrics,
    MetricsRequest, MetricsResponse, Signal, Traces, TracesRequest, TracesResponse,
};
