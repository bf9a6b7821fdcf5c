//! RPC status to HTTP mapping and error bodies
//!
//! The HTTP transport reports handler failures the same way the gRPC
//! transport does: a `google.rpc.Status` payload, encoded with the request's
//! content type, under the mapped HTTP status code.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prost::Message;
use tonic::Code;
use tonic_types::pb::ErrorInfo;
use tonic_types::Status as RpcStatus;

use crate::codec::ContentType;

/// Map a gRPC status code onto its HTTP equivalent.
pub fn grpc_code_to_http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::REQUEST_TIMEOUT,
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

const ERROR_INFO_TYPE_URL: &str = "type.googleapis.com/google.rpc.ErrorInfo";

/// Build an error response in the request's content type.
///
/// An unrecognizable content type degrades to a plaintext body carrying the
/// canonical reason phrase.
pub(crate) fn error_response(
    content_type: Option<ContentType>,
    code: Code,
    message: &str,
    error_info: Option<ErrorInfo>,
) -> Response {
    let http_status = grpc_code_to_http_status(code);
    match content_type {
        Some(ContentType::Protobuf) => {
            let details = error_info
                .map(|info| {
                    vec![prost_types::Any {
                        type_url: ERROR_INFO_TYPE_URL.to_string(),
                        value: info.encode_to_vec(),
                    }]
                })
                .unwrap_or_default();
            let status = RpcStatus {
                code: code as i32,
                message: message.to_string(),
                details,
            };
            (
                http_status,
                [(header::CONTENT_TYPE, ContentType::Protobuf.as_header_value())],
                status.encode_to_vec(),
            )
                .into_response()
        }
        Some(ContentType::Json) => {
            let body = serde_json::json!({
                "code": code as i32,
                "message": message,
            });
            (
                http_status,
                [(header::CONTENT_TYPE, ContentType::Json.as_header_value())],
                body.to_string(),
            )
                .into_response()
        }
        None => plaintext_response(http_status),
    }
}

/// Build an error response for a handler-produced status.
pub(crate) fn status_response(content_type: Option<ContentType>, status: &tonic::Status) -> Response {
    error_response(content_type, status.code(), status.message(), None)
}

/// Plaintext fallback used when no structured body can be produced.
pub(crate) fn plaintext_response(http_status: StatusCode) -> Response {
    let reason = http_status.canonical_reason().unwrap_or("error");
    (
        http_status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reason,
    )
        .into_response()
}
