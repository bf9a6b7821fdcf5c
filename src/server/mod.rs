//! Multiplexed OTLP server front-end
//!
//! [`ServerMux`] owns one lazily-created registration entry per signal and
//! serves every entry over both transports: the gRPC collector services are
//! added to a caller-supplied [`RoutesBuilder`], and [`ServerMux::http_router`]
//! exposes the `/v1/traces`, `/v1/metrics`, and `/v1/logs` POST endpoints.
//! Middleware composes in two layers: cross-signal layers wrap the whole
//! pipeline, per-signal layers wrap the user handler inside them, and within
//! each layer the first registration is the outermost wrapper.
//!
//! Registration is safe at any time; a request observes the handlers and
//! chains visible when it is dispatched.

mod entry;
mod http;
mod metadata;
mod status;

use std::future::Future;
use std::sync::{Arc, OnceLock};

use axum::routing::post;
use axum::Router;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::{
    LogsService, LogsServiceServer,
};
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::{
    MetricsService, MetricsServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use parking_lot::RwLock;
use tonic::service::RoutesBuilder;
use tonic::{Request, Response, Status};

use crate::signal::{
    ExportResult, Logs, LogsRequest, LogsResponse, Metrics, MetricsRequest, MetricsResponse,
    Signal, Traces, TracesRequest, TracesResponse,
};

pub use entry::{
    export_handler, handler_fn, BoxFuture, ExportHandler, ExportLayer, Handler, SignalHandler,
    SignalLayer,
};
pub use metadata::Context;
pub use status::grpc_code_to_http_status;

use entry::SignalEntry;

pub(crate) struct MuxShared {
    layers: RwLock<Vec<ExportLayer>>,
    traces: OnceLock<Arc<SignalEntry<Traces>>>,
    metrics: OnceLock<Arc<SignalEntry<Metrics>>>,
    logs: OnceLock<Arc<SignalEntry<Logs>>>,
}

/// Signal with a registration slot on the multiplexer.
pub(crate) trait MuxSignal: Signal {
    fn slot(shared: &MuxShared) -> &OnceLock<Arc<SignalEntry<Self>>>
    where
        Self: Sized;
}

impl MuxSignal for Traces {
    fn slot(shared: &MuxShared) -> &OnceLock<Arc<SignalEntry<Self>>> {
        &shared.traces
    }
}

impl MuxSignal for Metrics {
    fn slot(shared: &MuxShared) -> &OnceLock<Arc<SignalEntry<Self>>> {
        &shared.metrics
    }
}

impl MuxSignal for Logs {
    fn slot(shared: &MuxShared) -> &OnceLock<Arc<SignalEntry<Self>>> {
        &shared.logs
    }
}

/// Multiplexed OTLP server: per-signal handlers behind both transports.
///
/// Cloning is cheap; clones share registration state.
#[derive(Clone)]
pub struct ServerMux {
    shared: Arc<MuxShared>,
}

impl Default for ServerMux {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMux {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MuxShared {
                layers: RwLock::new(Vec::new()),
                traces: OnceLock::new(),
                metrics: OnceLock::new(),
                logs: OnceLock::new(),
            }),
        }
    }

    /// Register cross-signal middleware, applied to every signal.
    ///
    /// Layers wrap in registration order: the first registered layer is the
    /// outermost, and the whole cross-signal chain wraps every per-signal
    /// chain.
    pub fn layer<F>(&self, layer: F) -> &Self
    where
        F: Fn(ExportHandler) -> ExportHandler + Send + Sync + 'static,
    {
        self.shared.layers.write().push(Arc::new(layer));
        self
    }

    fn entry<S: MuxSignal>(&self) -> EntryHandle<S> {
        let entry = S::slot(&self.shared)
            .get_or_init(|| Arc::new(SignalEntry::new()))
            .clone();
        EntryHandle { entry }
    }

    /// The traces entry, created on first use.
    pub fn traces(&self) -> EntryHandle<Traces> {
        self.entry::<Traces>()
    }

    /// The metrics entry, created on first use.
    pub fn metrics(&self) -> EntryHandle<Metrics> {
        self.entry::<Metrics>()
    }

    /// The logs entry, created on first use.
    pub fn logs(&self) -> EntryHandle<Logs> {
        self.entry::<Logs>()
    }

    /// Add the gRPC collector services to a transport registrar.
    ///
    /// Only signals whose entry exists are published; an entry without a
    /// handler answers `Unimplemented`.
    pub fn register(&self, routes: &mut RoutesBuilder) {
        if self.shared.traces.get().is_some() {
            routes.add_service(TraceServiceServer::new(GrpcTraceService {
                shared: self.shared.clone(),
            }));
        }
        if self.shared.metrics.get().is_some() {
            routes.add_service(MetricsServiceServer::new(GrpcMetricsService {
                shared: self.shared.clone(),
            }));
        }
        if self.shared.logs.get().is_some() {
            routes.add_service(LogsServiceServer::new(GrpcLogsService {
                shared: self.shared.clone(),
            }));
        }
    }

    /// HTTP dispatcher for the three signal paths.
    ///
    /// Entries are consulted at dispatch time: a path whose entry does not
    /// exist answers 404, and unknown paths answer 404 with the
    /// codec-appropriate error body.
    pub fn http_router(&self) -> Router {
        Router::new()
            .route(Traces::HTTP_PATH, post(http::export_http::<Traces>))
            .route(Metrics::HTTP_PATH, post(http::export_http::<Metrics>))
            .route(Logs::HTTP_PATH, post(http::export_http::<Logs>))
            .fallback(http::not_found)
            .with_state(self.shared.clone())
    }
}

/// Handle to one signal's registration entry.
pub struct EntryHandle<S: Signal> {
    entry: Arc<SignalEntry<S>>,
}

impl<S: Signal> EntryHandle<S> {
    /// Install (or atomically replace) the signal's handler.
    pub fn handle(&self, handler: impl Handler<S> + 'static) -> &Self {
        self.entry.set_handler(Arc::new(handler));
        self
    }

    /// Install an async closure as the signal's handler.
    pub fn handle_fn<F, Fut>(&self, handler: F) -> &Self
    where
        F: Fn(Context, S::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExportResult<S::Response>> + Send + 'static,
    {
        self.entry.set_handler(handler_fn(handler));
        self
    }

    /// Register per-signal middleware; the first registered layer is the
    /// outermost of the per-signal chain.
    pub fn layer<F>(&self, layer: F) -> &Self
    where
        F: Fn(SignalHandler<S>) -> SignalHandler<S> + Send + Sync + 'static,
    {
        self.entry.push_layer(Arc::new(layer));
        self
    }
}

struct GrpcTraceService {
    shared: Arc<MuxShared>,
}

#[tonic::async_trait]
impl TraceService for GrpcTraceService {
    async fn export(
        &self,
        request: Request<TracesRequest>,
    ) -> Result<Response<TracesResponse>, Status> {
        export_grpc::<Traces>(&self.shared, request).await
    }
}

struct GrpcMetricsService {
    shared: Arc<MuxShared>,
}

#[tonic::async_trait]
impl MetricsService for GrpcMetricsService {
    async fn export(
        &self,
        request: Request<MetricsRequest>,
    ) -> Result<Response<MetricsResponse>, Status> {
        export_grpc::<Metrics>(&self.shared, request).await
    }
}

struct GrpcLogsService {
    shared: Arc<MuxShared>,
}

#[tonic::async_trait]
impl LogsService for GrpcLogsService {
    async fn export(
        &self,
        request: Request<LogsRequest>,
    ) -> Result<Response<LogsResponse>, Status> {
        export_grpc::<Logs>(&self.shared, request).await
    }
}

async fn export_grpc<S: MuxSignal>(
    shared: &MuxShared,
    request: Request<S::Request>,
) -> Result<Response<S::Response>, Status> {
    let Some(entry) = S::slot(shared).get().cloned() else {
        return Err(Status::unimplemented("no handler registered"));
    };
    let cx = Context::with_headers(request.metadata().clone());
    let request = request.into_inner();
    let shared_layers = shared.layers.read().clone();
    let response = entry.export(shared_layers, cx, request).await?;
    Ok(Response::new(response))
}
