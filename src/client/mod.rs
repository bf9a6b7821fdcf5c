//! Transport-polymorphic OTLP export client
//!
//! One upload call per signal, multiplexed per call onto the signal's
//! configured transport. gRPC signals share long-lived channels interned by
//! connection fingerprint; HTTP signals send one request per upload through
//! the shared (or per-signal) HTTP sub-client.
//!
//! Uploads hold the read side of the connection-table lock for the duration
//! of the call, so a channel is never closed underneath an in-flight export.
//! [`Client::stop`] takes the write side: draining uploads block shutdown,
//! and in-flight calls observe cancellation only when the stop token itself
//! is cancelled.

mod config;
mod error;
mod http;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use opentelemetry_proto::tonic::collector::logs::v1::logs_service_client::LogsServiceClient;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_client::MetricsServiceClient;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::Channel;

use crate::signal::{
    LogsRequest, LogsResponse, MetricsRequest, MetricsResponse, TracesRequest, TracesResponse,
};

use config::{ClientOptions, SignalOptions};

pub use config::{ClientConfig, Protocol, SignalConfig};
pub use error::{
    ClientError, ConfigError, LogsPartialSuccess, MetricsPartialSuccess, PartialSuccess,
    TracesPartialSuccess, UploadError,
};

#[derive(Default)]
struct ClientState {
    channels: HashMap<String, Channel>,
    stop_tokens: HashMap<String, CancellationToken>,
}

/// Low-level OTLP export client.
pub struct Client {
    options: ClientOptions,
    state: RwLock<ClientState>,
}

impl Client {
    /// Validate the configuration and build a client.
    ///
    /// No connection is opened until [`Client::start`].
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let options = config.build()?;
        for so in [&options.traces, &options.metrics, &options.logs] {
            tracing::debug!(
                signal = so.signal,
                protocol = %so.protocol,
                endpoint = %so.endpoint,
                timeout = ?so.timeout,
                "configured signal"
            );
        }
        Ok(Self {
            options,
            state: RwLock::new(ClientState::default()),
        })
    }

    /// Open one channel per distinct gRPC fingerprint.
    ///
    /// HTTP-protocol signals need no start. Signals whose fingerprints match
    /// share a channel and a stop token.
    pub async fn start(&self) -> Result<(), ClientError> {
        let mut state = self.state.write().await;
        for so in [
            &self.options.traces,
            &self.options.metrics,
            &self.options.logs,
        ] {
            if !so.protocol.is_grpc() || state.channels.contains_key(&so.fingerprint) {
                continue;
            }
            tracing::info!(
                target = %so.grpc_target(),
                fingerprint = %&so.fingerprint[..8],
                "connecting to grpc endpoint"
            );
            let channel = so.open_channel().await.map_err(|source| ClientError::Connect {
                signal: so.signal,
                source,
            })?;
            state.channels.insert(so.fingerprint.clone(), channel);
            state
                .stop_tokens
                .insert(so.fingerprint.clone(), CancellationToken::new());
        }
        Ok(())
    }

    /// Upload trace envelopes over the traces signal's transport.
    ///
    /// An empty list is a valid call and produces an empty export request.
    pub async fn upload_traces(
        &self,
        resource_spans: Vec<ResourceSpans>,
    ) -> Result<(), UploadError> {
        let state = self.state.read().await;
        let so = &self.options.traces;
        let request = TracesRequest { resource_spans };
        let response: TracesResponse = match so.protocol.http_content_type() {
            None => {
                let (channel, stop) = grpc_channel(&state, so)?;
                let mut client = TraceServiceClient::new(channel);
                if so.gzip {
                    client = client.send_compressed(CompressionEncoding::Gzip);
                }
                let mut grpc_request = tonic::Request::new(request);
                insert_metadata(grpc_request.metadata_mut(), &so.headers)?;
                tracing::debug!(fingerprint = %&so.fingerprint[..8], "uploading traces over grpc");
                run_export(so.timeout, stop.as_ref(), async move {
                    client.export(grpc_request).await
                })
                .await?
                .into_inner()
            }
            Some(content_type) => {
                tracing::debug!(endpoint = %so.endpoint, "uploading traces over http");
                self.send_http(so, content_type, &request).await?
            }
        };
        if response.partial_success.is_some() {
            return Err(PartialSuccess::Traces(TracesPartialSuccess::new(response)).into());
        }
        Ok(())
    }

    /// Upload metric envelopes over the metrics signal's transport.
    pub async fn upload_metrics(
        &self,
        resource_metrics: Vec<ResourceMetrics>,
    ) -> Result<(), UploadError> {
        let state = self.state.read().await;
        let so = &self.options.metrics;
        let request = MetricsRequest { resource_metrics };
        let response: MetricsResponse = match so.protocol.http_content_type() {
            None => {
                let (channel, stop) = grpc_channel(&state, so)?;
                let mut client = MetricsServiceClient::new(channel);
                if so.gzip {
                    client = client.send_compressed(CompressionEncoding::Gzip);
                }
                let mut grpc_request = tonic::Request::new(request);
                insert_metadata(grpc_request.metadata_mut(), &so.headers)?;
                tracing::debug!(fingerprint = %&so.fingerprint[..8], "uploading metrics over grpc");
                run_export(so.timeout, stop.as_ref(), async move {
                    client.export(grpc_request).await
                })
                .await?
                .into_inner()
            }
            Some(content_type) => {
                tracing::debug!(endpoint = %so.endpoint, "uploading metrics over http");
                self.send_http(so, content_type, &request).await?
            }
        };
        if response.partial_success.is_some() {
            return Err(PartialSuccess::Metrics(MetricsPartialSuccess::new(response)).into());
        }
        Ok(())
    }

    /// Upload log envelopes over the logs signal's transport.
    pub async fn upload_logs(&self, resource_logs: Vec<ResourceLogs>) -> Result<(), UploadError> {
        let state = self.state.read().await;
        let so = &self.options.logs;
        let request = LogsRequest { resource_logs };
        let response: LogsResponse = match so.protocol.http_content_type() {
            None => {
                let (channel, stop) = grpc_channel(&state, so)?;
                let mut client = LogsServiceClient::new(channel);
                if so.gzip {
                    client = client.send_compressed(CompressionEncoding::Gzip);
                }
                let mut grpc_request = tonic::Request::new(request);
                insert_metadata(grpc_request.metadata_mut(), &so.headers)?;
                tracing::debug!(fingerprint = %&so.fingerprint[..8], "uploading logs over grpc");
                run_export(so.timeout, stop.as_ref(), async move {
                    client.export(grpc_request).await
                })
                .await?
                .into_inner()
            }
            Some(content_type) => {
                tracing::debug!(endpoint = %so.endpoint, "uploading logs over http");
                self.send_http(so, content_type, &request).await?
            }
        };
        if response.partial_success.is_some() {
            return Err(PartialSuccess::Logs(LogsPartialSuccess::new(response)).into());
        }
        Ok(())
    }

    async fn send_http<Req, Resp>(
        &self,
        so: &SignalOptions,
        content_type: crate::codec::ContentType,
        request: &Req,
    ) -> Result<Resp, UploadError>
    where
        Req: prost::Message + serde::Serialize,
        Resp: prost::Message + Default + serde::de::DeserializeOwned,
    {
        let client = so.http_client.as_ref().unwrap_or(&self.options.http_client);
        let send = http::send_http(client, so, content_type, request);
        match so.timeout {
            Some(duration) if !duration.is_zero() => {
                match tokio::time::timeout(duration, send).await {
                    Ok(result) => result,
                    Err(_) => Err(UploadError::Timeout(duration)),
                }
            }
            _ => send.await,
        }
    }

    /// Cancel the stop token of every fingerprint, so in-flight gRPC uploads
    /// observe cancellation while shutdown waits for the write lock.
    async fn cancel_inflight(&self) {
        let state = self.state.read().await;
        for token in state.stop_tokens.values() {
            token.cancel();
        }
    }

    /// Drain uploads, close every channel, and clear per-fingerprint state.
    ///
    /// If `cancel` is already cancelled, or becomes cancelled while shutdown
    /// waits for draining uploads, every stop token fires first so in-flight
    /// calls unblock; the triggered cancellation then surfaces as
    /// [`ClientError::Canceled`] after cleanup. Stopping a client that never
    /// opened a channel returns [`ClientError::AlreadyClosed`].
    pub async fn stop(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        let mut state = if cancel.is_cancelled() {
            self.cancel_inflight().await;
            self.state.write().await
        } else {
            tokio::select! {
                guard = self.state.write() => guard,
                _ = cancel.cancelled() => {
                    self.cancel_inflight().await;
                    self.state.write().await
                }
            }
        };

        if state.channels.is_empty() {
            return Err(ClientError::AlreadyClosed);
        }
        for (fingerprint, _channel) in state.channels.drain() {
            tracing::info!(fingerprint = %&fingerprint[..8], "closing grpc channel");
        }
        for (_, token) in state.stop_tokens.drain() {
            token.cancel();
        }

        if cancel.is_cancelled() {
            Err(ClientError::Canceled)
        } else {
            Ok(())
        }
    }
}

fn grpc_channel(
    state: &ClientState,
    so: &SignalOptions,
) -> Result<(Channel, Option<CancellationToken>), UploadError> {
    let channel = state
        .channels
        .get(&so.fingerprint)
        .cloned()
        .ok_or(UploadError::NotStarted)?;
    let stop = state.stop_tokens.get(&so.fingerprint).cloned();
    Ok((channel, stop))
}

fn insert_metadata(
    metadata: &mut MetadataMap,
    headers: &HashMap<String, String>,
) -> Result<(), UploadError> {
    for (key, value) in headers {
        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
            .map_err(|_| UploadError::InvalidHeader(key.clone()))?;
        let value = MetadataValue::try_from(value.as_str())
            .map_err(|_| UploadError::InvalidHeader(key.clone()))?;
        metadata.insert(name, value);
    }
    Ok(())
}

/// Run a gRPC export under the signal's timeout and the fingerprint's stop
/// token.
async fn run_export<T, F>(
    timeout: Option<Duration>,
    stop: Option<&CancellationToken>,
    call: F,
) -> Result<T, UploadError>
where
    F: Future<Output = Result<T, tonic::Status>>,
{
    let guarded = async {
        match stop {
            Some(token) => {
                tokio::select! {
                    result = call => result.map_err(UploadError::from),
                    _ = token.cancelled() => Err(UploadError::Canceled),
                }
            }
            None => call.await.map_err(UploadError::from),
        }
    };
    match timeout {
        Some(duration) if !duration.is_zero() => {
            match tokio::time::timeout(duration, guarded).await {
                Ok(result) => result,
                Err(_) => Err(UploadError::Timeout(duration)),
            }
        }
        _ => guarded.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerMux;
    use crate::testing::GrpcTestServer;

    fn grpc_mux() -> ServerMux {
        let mux = ServerMux::new();
        mux.traces()
            .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });
        mux.metrics()
            .handle_fn(|_cx, _req| async move { Ok(MetricsResponse::default()) });
        mux.logs()
            .handle_fn(|_cx, _req| async move { Ok(LogsResponse::default()) });
        mux
    }

    #[tokio::test]
    async fn test_upload_before_start_is_not_started() {
        let client = Client::new(
            ClientConfig::new()
                .endpoint("http://127.0.0.1:1")
                .unwrap(),
        )
        .unwrap();
        let err = client.upload_traces(Vec::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::NotStarted));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_already_closed() {
        let client = Client::new(
            ClientConfig::new()
                .endpoint("http://127.0.0.1:1")
                .unwrap(),
        )
        .unwrap();
        let err = client.stop(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyClosed));
    }

    #[tokio::test]
    async fn test_equal_fingerprints_share_one_channel() {
        let server = GrpcTestServer::spawn(&grpc_mux()).await.unwrap();
        let client = Client::new(
            ClientConfig::new().endpoint(server.url()).unwrap(),
        )
        .unwrap();
        client.start().await.unwrap();
        {
            let state = client.state.read().await;
            assert_eq!(state.channels.len(), 1);
            assert_eq!(state.stop_tokens.len(), 1);
        }
        client.stop(CancellationToken::new()).await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_distinct_gzip_gets_distinct_channel() {
        let server = GrpcTestServer::spawn(&grpc_mux()).await.unwrap();
        let client = Client::new(
            ClientConfig::new()
                .endpoint(server.url())
                .unwrap()
                .metrics(SignalConfig::default().gzip(true)),
        )
        .unwrap();
        client.start().await.unwrap();
        {
            let state = client.state.read().await;
            assert_eq!(state.channels.len(), 2);
        }
        client.stop(CancellationToken::new()).await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_stop_is_already_closed() {
        let server = GrpcTestServer::spawn(&grpc_mux()).await.unwrap();
        let client = Client::new(
            ClientConfig::new().endpoint(server.url()).unwrap(),
        )
        .unwrap();
        client.start().await.unwrap();
        client.stop(CancellationToken::new()).await.unwrap();
        let err = client.stop(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyClosed));
        server.shutdown().await;
    }
}
