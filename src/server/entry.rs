//! Per-signal handler registration and middleware composition

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tonic::Status;

use crate::signal::{ExportRequest, ExportResponse, ExportResult, Signal};

use super::metadata::Context;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Erased handler the cross-signal middleware chain is built from.
pub type ExportHandler =
    Arc<dyn Fn(Context, ExportRequest) -> BoxFuture<'static, ExportResult<ExportResponse>> + Send + Sync>;

/// Cross-signal middleware: wraps an [`ExportHandler`] in another.
///
/// Within the chain, the first registered layer is the outermost wrapper.
pub type ExportLayer = Arc<dyn Fn(ExportHandler) -> ExportHandler + Send + Sync>;

/// Handler for one signal's export requests.
#[async_trait]
pub trait Handler<S: Signal>: Send + Sync {
    async fn call(&self, cx: Context, request: S::Request) -> ExportResult<S::Response>;
}

/// Shared, replaceable handler reference.
pub type SignalHandler<S> = Arc<dyn Handler<S>>;

/// Per-signal middleware: wraps a [`SignalHandler`] in another.
///
/// Within the chain, the first registered layer is the outermost wrapper;
/// the whole per-signal chain runs inside the cross-signal chain.
pub type SignalLayer<S> = Arc<dyn Fn(SignalHandler<S>) -> SignalHandler<S> + Send + Sync>;

struct FnHandler<F>(F);

#[async_trait]
impl<S, F, Fut> Handler<S> for FnHandler<F>
where
    S: Signal,
    F: Fn(Context, S::Request) -> Fut + Send + Sync,
    Fut: Future<Output = ExportResult<S::Response>> + Send,
{
    async fn call(&self, cx: Context, request: S::Request) -> ExportResult<S::Response> {
        (self.0)(cx, request).await
    }
}

/// Wrap an async closure as a [`SignalHandler`].
pub fn handler_fn<S, F, Fut>(f: F) -> SignalHandler<S>
where
    S: Signal,
    F: Fn(Context, S::Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExportResult<S::Response>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap an async closure as an [`ExportHandler`].
pub fn export_handler<F, Fut>(f: F) -> ExportHandler
where
    F: Fn(Context, ExportRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExportResult<ExportResponse>> + Send + 'static,
{
    Arc::new(move |cx, request| Box::pin(f(cx, request)))
}

struct EntryState<S: Signal> {
    handler: Option<SignalHandler<S>>,
    layers: Vec<SignalLayer<S>>,
}

/// Registration slot for one signal: the handler and its middleware chain.
///
/// Dispatch snapshots the state under the read lock and releases it before
/// any await point, so handler replacement is atomic and applies to requests
/// arriving strictly after the swap.
pub(crate) struct SignalEntry<S: Signal> {
    state: RwLock<EntryState<S>>,
}

impl<S: Signal> SignalEntry<S> {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(EntryState {
                handler: None,
                layers: Vec::new(),
            }),
        }
    }

    pub(crate) fn set_handler(&self, handler: SignalHandler<S>) {
        self.state.write().handler = Some(handler);
    }

    pub(crate) fn push_layer(&self, layer: SignalLayer<S>) {
        self.state.write().layers.push(layer);
    }

    /// Run the composed chain: cross-signal layers around per-signal layers
    /// around the user handler.
    pub(crate) async fn export(
        &self,
        shared_layers: Vec<ExportLayer>,
        cx: Context,
        request: S::Request,
    ) -> ExportResult<S::Response> {
        let (handler, layers) = {
            let state = self.state.read();
            (state.handler.clone(), state.layers.clone())
        };
        let Some(handler) = handler else {
            return Err(Status::unimplemented("no handler registered"));
        };

        let mut wrapped = handler;
        for layer in layers.iter().rev() {
            wrapped = layer(wrapped);
        }

        let base: ExportHandler = Arc::new(move |cx, request| {
            let handler = wrapped.clone();
            Box::pin(async move {
                let request = S::request_from(request)
                    .ok_or_else(|| Status::internal("unexpected request type"))?;
                let response = handler.call(cx, request).await?;
                Ok(S::response_into(response))
            })
        });

        let mut chain = base;
        for layer in shared_layers.iter().rev() {
            chain = layer(chain);
        }

        let response = chain(cx, S::request_into(request)).await?;
        S::response_from(response).ok_or_else(|| Status::internal("unexpected response type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Traces, TracesRequest, TracesResponse};

    #[derive(Debug, Clone, PartialEq)]
    struct Trail(Vec<&'static str>);

    fn push(cx: &mut Context, step: &'static str) {
        let mut trail = cx
            .extensions()
            .get::<Trail>()
            .cloned()
            .unwrap_or(Trail(Vec::new()));
        trail.0.push(step);
        cx.extensions_mut().insert(trail);
    }

    fn trail_layer(step: &'static str) -> ExportLayer {
        Arc::new(move |next: ExportHandler| {
            export_handler(move |mut cx, request| {
                let next = next.clone();
                async move {
                    push(&mut cx, step);
                    next(cx, request).await
                }
            })
        })
    }

    fn signal_trail_layer(step: &'static str) -> SignalLayer<Traces> {
        Arc::new(move |next: SignalHandler<Traces>| {
            handler_fn::<Traces, _, _>(move |mut cx, request| {
                let next = next.clone();
                async move {
                    push(&mut cx, step);
                    next.call(cx, request).await
                }
            })
        })
    }

    #[tokio::test]
    async fn test_unregistered_handler_is_unimplemented() {
        let entry = SignalEntry::<Traces>::new();
        let err = entry
            .export(Vec::new(), Context::new(), TracesRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_layer_ordering_cross_then_signal_then_handler() {
        let entry = SignalEntry::<Traces>::new();
        entry.push_layer(signal_trail_layer("signal-1"));
        entry.push_layer(signal_trail_layer("signal-2"));
        entry.set_handler(handler_fn::<Traces, _, _>(|cx: Context, _req| async move {
            let trail = cx.extensions().get::<Trail>().cloned().unwrap();
            assert_eq!(
                trail.0,
                vec!["cross-1", "cross-2", "signal-1", "signal-2"]
            );
            Ok(TracesResponse::default())
        }));

        let shared = vec![trail_layer("cross-1"), trail_layer("cross-2")];
        entry
            .export(shared, Context::new(), TracesRequest::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_replacement_is_observed() {
        let entry = SignalEntry::<Traces>::new();
        entry.set_handler(handler_fn::<Traces, _, _>(|_cx, _req| async move {
            Err(Status::internal("first"))
        }));
        entry.set_handler(handler_fn::<Traces, _, _>(|_cx, _req| async move {
            Ok(TracesResponse::default())
        }));
        entry
            .export(Vec::new(), Context::new(), TracesRequest::default())
            .await
            .unwrap();
    }
}
