//! Embedded servers for exercising the full path in tests
//!
//! Both harnesses bind an ephemeral 127.0.0.1 port, serve a [`ServerMux`]
//! behind the real transport, and expose the endpoint URLs so exporters and
//! this crate's own [`Client`](crate::Client) can be pointed at them.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server as TonicServer;

use crate::server::ServerMux;

/// A gRPC server for the mux's registered collector services.
pub struct GrpcTestServer {
    url: String,
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl GrpcTestServer {
    /// Bind an ephemeral port and serve the mux's gRPC services on it.
    ///
    /// Entries registered on the mux before the call are published; register
    /// handlers first.
    pub async fn spawn(mux: &ServerMux) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let mut routes = RoutesBuilder::default();
        mux.register(&mut routes);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let incoming = TcpListenerStream::new(listener);
        let handle = tokio::spawn(async move {
            let result = TonicServer::builder()
                .add_routes(routes.routes())
                .serve_with_incoming_shutdown(incoming, signal.cancelled_owned())
                .await;
            if let Err(error) = result {
                tracing::error!(error = %error, "grpc test server failed");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            addr,
            shutdown,
            handle,
        })
    }

    /// Endpoint URL for clients and exporters (`http://127.0.0.1:<port>`).
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// An HTTP server for the mux's `/v1/<signal>` endpoints.
pub struct HttpTestServer {
    url: String,
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl HttpTestServer {
    /// Bind an ephemeral port and serve the mux's HTTP router on it.
    pub async fn spawn(mux: &ServerMux) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = mux.http_router();

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(signal.cancelled_owned())
                .await;
            if let Err(error) = result {
                tracing::error!(error = %error, "http test server failed");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            addr,
            shutdown,
            handle,
        })
    }

    /// Base URL (`http://127.0.0.1:<port>`).
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint URL of one signal path, e.g. `/v1/traces`.
    pub fn traces_url(&self) -> String {
        format!("{}/v1/traces", self.url)
    }

    pub fn metrics_url(&self) -> String {
        format!("{}/v1/metrics", self.url)
    }

    pub fn logs_url(&self) -> String {
        format!("{}/v1/logs", self.url)
    }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}
