//! Client configuration: defaults, per-signal overrides, environment
//!
//! A [`ClientConfig`] holds shared defaults plus one [`SignalConfig`]
//! override block per signal; the effective per-signal options are resolved
//! when the client is built. Signals whose resolved `(host, user-agent,
//! TLS, compression)` tuples hash to the same fingerprint share one gRPC
//! channel.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sha2::{Digest, Sha512};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use url::Url;

use crate::codec::ContentType;

use super::error::ConfigError;

/// Wire protocol used for one signal's uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    HttpJson,
    HttpProtobuf,
}

impl Protocol {
    pub fn is_grpc(self) -> bool {
        self == Protocol::Grpc
    }

    /// Content type of the HTTP body, `None` for gRPC.
    pub fn http_content_type(self) -> Option<ContentType> {
        match self {
            Protocol::Grpc => None,
            Protocol::HttpJson => Some(ContentType::Json),
            Protocol::HttpProtobuf => Some(ContentType::Protobuf),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => write!(f, "grpc"),
            Protocol::HttpJson => write!(f, "http/json"),
            Protocol::HttpProtobuf => write!(f, "http/protobuf"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grpc" => Ok(Protocol::Grpc),
            "http/json" => Ok(Protocol::HttpJson),
            "http/protobuf" => Ok(Protocol::HttpProtobuf),
            other => Err(ConfigError::Protocol(other.to_string())),
        }
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ConfigError::Scheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(ConfigError::MissingHost);
    }
    Ok(url)
}

/// Parse a comma-separated `key=value` header list.
fn parse_headers_str(headers: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut parsed = HashMap::new();
    for part in headers.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(ConfigError::Header(part.to_string()));
        };
        parsed.insert(key.to_string(), value.to_string());
    }
    Ok(parsed)
}

/// Per-signal configuration overrides. Unset fields fall back to the
/// client-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct SignalConfig {
    endpoint: Option<Url>,
    protocol: Option<Protocol>,
    user_agent: Option<String>,
    headers: HashMap<String, String>,
    gzip: Option<bool>,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
}

impl SignalConfig {
    pub fn endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.endpoint = Some(parse_endpoint(endpoint)?);
        Ok(self)
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Headers from a comma-separated `key=value` list.
    pub fn headers_str(mut self, headers: &str) -> Result<Self, ConfigError> {
        self.headers = parse_headers_str(headers)?;
        Ok(self)
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = Some(gzip);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    fn apply_env(mut self, signal: &str, prefixes: &[&str]) -> Result<Self, ConfigError> {
        if let Some(value) = lookup_env(&format!("OTLP_{signal}_PROTOCOL"), prefixes) {
            self.protocol = Some(value.parse()?);
        }
        if let Some(value) = lookup_env(&format!("OTLP_{signal}_ENDPOINT"), prefixes) {
            self.endpoint = Some(parse_endpoint(&value)?);
        }
        if let Some(value) = lookup_env(&format!("OTLP_{signal}_TIMEOUT"), prefixes) {
            self.timeout = Some(parse_timeout(&format!("OTLP_{signal}_TIMEOUT"), &value)?);
        }
        if let Some(value) = lookup_env(&format!("OTLP_{signal}_HEADERS"), prefixes) {
            self.headers = parse_headers_str(&value)?;
        }
        Ok(self)
    }
}

/// Client-wide defaults plus per-signal overrides.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    endpoint: Option<Url>,
    protocol: Option<Protocol>,
    user_agent: Option<String>,
    headers: HashMap<String, String>,
    gzip: Option<bool>,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
    traces: SignalConfig,
    metrics: SignalConfig,
    logs: SignalConfig,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base endpoint shared by all signals. The scheme must be `http` or
    /// `https` and decides TLS.
    pub fn endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.endpoint = Some(parse_endpoint(endpoint)?);
        Ok(self)
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Headers from a comma-separated `key=value` list.
    pub fn headers_str(mut self, headers: &str) -> Result<Self, ConfigError> {
        self.headers = parse_headers_str(headers)?;
        Ok(self)
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = Some(gzip);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn traces(mut self, traces: SignalConfig) -> Self {
        self.traces = traces;
        self
    }

    pub fn metrics(mut self, metrics: SignalConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn logs(mut self, logs: SignalConfig) -> Self {
        self.logs = logs;
        self
    }

    /// Apply the recognized `OTLP_*` environment variables.
    ///
    /// Each variable is looked up under every prefix, upper-case then
    /// lower-case. A parse failure on any present variable aborts
    /// configuration.
    pub fn apply_env(mut self, prefixes: &[&str]) -> Result<Self, ConfigError> {
        if let Some(value) = lookup_env("OTLP_PROTOCOL", prefixes) {
            self.protocol = Some(value.parse()?);
        }
        if let Some(value) = lookup_env("OTLP_ENDPOINT", prefixes) {
            self.endpoint = Some(parse_endpoint(&value)?);
        }
        if let Some(value) = lookup_env("OTLP_TIMEOUT", prefixes) {
            self.timeout = Some(parse_timeout("OTLP_TIMEOUT", &value)?);
        }
        if let Some(value) = lookup_env("OTLP_HEADERS", prefixes) {
            self.headers = parse_headers_str(&value)?;
        }
        self.traces = self.traces.apply_env("TRACES", prefixes)?;
        self.metrics = self.metrics.apply_env("METRICS", prefixes)?;
        self.logs = self.logs.apply_env("LOGS", prefixes)?;
        Ok(self)
    }

    /// Resolve the effective per-signal options.
    pub(crate) fn build(self) -> Result<ClientOptions, ConfigError> {
        let defaults = Defaults {
            endpoint: self.endpoint,
            protocol: self.protocol.unwrap_or(Protocol::Grpc),
            user_agent: self.user_agent.unwrap_or_else(default_user_agent),
            headers: self.headers,
            gzip: self.gzip.unwrap_or(false),
            timeout: self.timeout,
            http_client: self.http_client.clone(),
        };
        Ok(ClientOptions {
            traces: SignalOptions::resolve("traces", self.traces, &defaults)?,
            metrics: SignalOptions::resolve("metrics", self.metrics, &defaults)?,
            logs: SignalOptions::resolve("logs", self.logs, &defaults)?,
            http_client: self.http_client.unwrap_or_default(),
        })
    }
}

/// Effective client options after merging every signal with the defaults.
#[derive(Debug, Clone)]
pub(crate) struct ClientOptions {
    pub(crate) traces: SignalOptions,
    pub(crate) metrics: SignalOptions,
    pub(crate) logs: SignalOptions,
    pub(crate) http_client: reqwest::Client,
}

struct Defaults {
    endpoint: Option<Url>,
    protocol: Protocol,
    user_agent: String,
    headers: HashMap<String, String>,
    gzip: bool,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
}

fn default_user_agent() -> String {
    format!("otlp-conduit/{}", env!("CARGO_PKG_VERSION"))
}

fn parse_timeout(var: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::Env {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

/// Look up `name` under each prefix, trying the upper-case variant before
/// the lower-case one.
fn lookup_env(name: &str, prefixes: &[&str]) -> Option<String> {
    let name = name.replace('-', "_");
    let upper = name.to_uppercase();
    let lower = name.to_lowercase();
    let empty = [""];
    let prefixes = if prefixes.is_empty() {
        &empty[..]
    } else {
        prefixes
    };
    for prefix in prefixes {
        let candidates = [
            format!("{}{}", prefix.to_uppercase(), upper),
            format!("{}{}", prefix.to_uppercase(), lower),
            format!("{}{}", prefix, upper),
            format!("{}{}", prefix, lower),
        ];
        for candidate in candidates {
            if let Ok(value) = std::env::var(&candidate) {
                return Some(value);
            }
        }
    }
    None
}

/// Effective configuration of one signal after merging overrides with
/// defaults.
#[derive(Debug, Clone)]
pub(crate) struct SignalOptions {
    pub(crate) signal: &'static str,
    pub(crate) protocol: Protocol,
    pub(crate) endpoint: Url,
    pub(crate) user_agent: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) gzip: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) http_client: Option<reqwest::Client>,
    pub(crate) fingerprint: String,
}

impl SignalOptions {
    fn resolve(
        signal: &'static str,
        config: SignalConfig,
        defaults: &Defaults,
    ) -> Result<Self, ConfigError> {
        let protocol = config.protocol.unwrap_or(defaults.protocol);
        let user_agent = config
            .user_agent
            .unwrap_or_else(|| defaults.user_agent.clone());
        let gzip = config.gzip.unwrap_or(defaults.gzip);
        let timeout = config.timeout.or(defaults.timeout);
        let http_client = config.http_client.or_else(|| defaults.http_client.clone());

        let endpoint = match config.endpoint {
            Some(endpoint) => endpoint,
            None => {
                let base = defaults
                    .endpoint
                    .as_ref()
                    .ok_or(ConfigError::MissingEndpoint(signal))?;
                if protocol.is_grpc() {
                    base.clone()
                } else {
                    join_signal_path(base, signal)?
                }
            }
        };

        let mut headers = config.headers;
        for (key, value) in &defaults.headers {
            headers.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let fingerprint = fingerprint(&endpoint, &user_agent, gzip);
        Ok(Self {
            signal,
            protocol,
            endpoint,
            user_agent,
            headers,
            gzip,
            timeout,
            http_client,
            fingerprint,
        })
    }

    /// gRPC dial target: scheme plus authority of the endpoint.
    pub(crate) fn grpc_target(&self) -> String {
        format!("{}://{}", self.endpoint.scheme(), self.endpoint.authority())
    }

    /// Open the long-lived channel for this signal's fingerprint.
    pub(crate) async fn open_channel(&self) -> Result<Channel, tonic::transport::Error> {
        let mut endpoint =
            Endpoint::from_shared(self.grpc_target())?.user_agent(self.user_agent.clone())?;
        if self.endpoint.scheme() == "https" {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }
        endpoint.connect().await
    }
}

/// HTTP-family signals without an explicit endpoint export to
/// `<base>/v1/<signal>`.
fn join_signal_path(base: &Url, signal: &str) -> Result<Url, ConfigError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ConfigError::MissingHost)?
        .pop_if_empty()
        .extend(["v1", signal]);
    Ok(url)
}

/// Digest over the connection-relevant tuple; equal digests share a channel.
fn fingerprint(endpoint: &Url, user_agent: &str, gzip: bool) -> String {
    let mut hasher = Sha512::new();
    hasher.update(endpoint.authority().as_bytes());
    hasher.update(user_agent.as_bytes());
    if endpoint.scheme() == "https" {
        hasher.update(b"tls");
    } else {
        hasher.update(b"insecure");
    }
    if gzip {
        hasher.update(b"gzip");
    }
    hex::encode(hasher.finalize())
}
