//! Per-request context and the header bridge
//!
//! Both transports normalize their headers into one case-insensitive
//! multimap ([`tonic::metadata::MetadataMap`]) carried on the request
//! [`Context`]. gRPC requests install their incoming metadata; the HTTP
//! bridge copies the request headers into an outgoing-compatible metadata
//! map before the handler chain runs, so cross-transport middleware can
//! interrogate headers uniformly. A context built outside a transport
//! reports headers as absent, which handlers can distinguish from "headers
//! present but key missing".

use http::Extensions;
use tonic::metadata::MetadataMap;

/// Per-request context flowing through middleware chains and handlers.
#[derive(Debug, Default, Clone)]
pub struct Context {
    headers: Option<MetadataMap>,
    extensions: Extensions,
}

impl Context {
    /// A context with no transport headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying transport headers.
    pub fn with_headers(headers: MetadataMap) -> Self {
        Self {
            headers: Some(headers),
            extensions: Extensions::new(),
        }
    }

    /// Transport headers, or `None` when the request did not come through a
    /// transport.
    pub fn headers(&self) -> Option<&MetadataMap> {
        self.headers.as_ref()
    }

    /// First value of a header, as a string. Lookup is case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .get(name.to_ascii_lowercase())
            .and_then(|value| value.to_str().ok())
    }

    /// Typed values installed by middleware for inner layers and handlers.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
