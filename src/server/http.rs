//! HTTP bridge: decode the body, run the handler chain, encode the response
//!
//! Each signal path accepts POST bodies in either OTLP encoding. The request
//! headers are normalized into the [`Context`] before the chain runs, so the
//! same middleware observes the same header contract on both transports.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tonic::metadata::MetadataMap;
use tonic::Code;
use tonic_types::pb::ErrorInfo;

use crate::codec::{decode_request, encode_response, ContentType};

use super::metadata::Context;
use super::status::{error_response, plaintext_response, status_response};
use super::{MuxShared, MuxSignal};

fn content_type_of(headers: &HeaderMap) -> Option<ContentType> {
    let value = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    ContentType::from_value(value)
}

fn reason(error: impl std::fmt::Display) -> ErrorInfo {
    ErrorInfo {
        reason: error.to_string(),
        domain: String::new(),
        metadata: Default::default(),
    }
}

pub(crate) async fn export_http<S: MuxSignal>(
    State(shared): State<Arc<MuxShared>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(content_type) = content_type_of(&headers) else {
        return plaintext_response(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    };
    let Some(entry) = S::slot(&shared).get().cloned() else {
        return error_response(
            Some(content_type),
            Code::NotFound,
            "no handler registered for path",
            None,
        );
    };

    let cx = Context::with_headers(MetadataMap::from_headers(headers));
    let request: S::Request = match decode_request(&body, content_type) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(error = %error, signal = S::NAME, "failed to decode request body");
            return error_response(
                Some(content_type),
                Code::InvalidArgument,
                "unable to decode request body",
                Some(reason(&error)),
            );
        }
    };

    let shared_layers = shared.layers.read().clone();
    match entry.export(shared_layers, cx, request).await {
        Ok(response) => match encode_response(&response, content_type) {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type.as_header_value())],
                bytes,
            )
                .into_response(),
            Err(error) => {
                tracing::error!(error = %error, signal = S::NAME, "failed to encode response");
                error_response(
                    Some(content_type),
                    Code::Internal,
                    "unable to encode response",
                    Some(reason(&error)),
                )
            }
        },
        Err(status) => status_response(Some(content_type), &status),
    }
}

/// Unknown paths answer NotFound in the request's encoding when it is
/// recognizable, plaintext otherwise.
pub(crate) async fn not_found(headers: HeaderMap) -> Response {
    error_response(
        content_type_of(&headers),
        Code::NotFound,
        "no handler registered for path",
        None,
    )
}
