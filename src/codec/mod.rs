//! OTLP content-type encoding and decoding
//!
//! Both wire encodings of the OTLP/HTTP transport are supported: protobuf
//! (`application/x-protobuf`) and JSON (`application/json`). The JSON side
//! goes through [`json`], which layers the OTLP hex identifier convention on
//! top of the message types' serde representation.

pub mod json;

use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

use self::json::JsonCodecError;

/// Content type of an OTLP/HTTP request or response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Protobuf,
    Json,
}

impl ContentType {
    /// Parse a `Content-Type` header value.
    ///
    /// Matching is exact: values carrying parameters such as
    /// `application/json;charset=utf-8` are not recognized.
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "application/x-protobuf" => Some(ContentType::Protobuf),
            "application/json" => Some(ContentType::Json),
            _ => None,
        }
    }

    /// Header value to send with a body of this content type.
    pub fn as_header_value(self) -> &'static str {
        match self {
            ContentType::Protobuf => "application/x-protobuf",
            ContentType::Json => "application/json",
        }
    }
}

/// Error returned when a request body fails to decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("JSON decode error: {0}")]
    Json(#[from] JsonCodecError),
}

/// Decode an OTLP request body.
///
/// An empty body decodes to the zero-valued message for either content type.
pub fn decode_request<T>(body: &[u8], content_type: ContentType) -> Result<T, DecodeError>
where
    T: Message + Default + DeserializeOwned,
{
    if body.is_empty() {
        return Ok(T::default());
    }
    match content_type {
        ContentType::Protobuf => Ok(T::decode(body)?),
        ContentType::Json => Ok(json::unmarshal_json(body)?),
    }
}

/// Error returned when a response body fails to encode.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("JSON encode error: {0}")]
    Json(#[from] JsonCodecError),
}

/// Encode an OTLP response body.
pub fn encode_response<T>(response: &T, content_type: ContentType) -> Result<Vec<u8>, EncodeError>
where
    T: Message + Serialize,
{
    match content_type {
        ContentType::Protobuf => Ok(response.encode_to_vec()),
        ContentType::Json => Ok(json::marshal_json(response)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::collector::trace::v1::{
        ExportTraceServiceRequest, ExportTraceServiceResponse,
    };

    #[test]
    fn test_content_type_exact_match() {
        assert_eq!(
            ContentType::from_value("application/x-protobuf"),
            Some(ContentType::Protobuf)
        );
        assert_eq!(
            ContentType::from_value("application/json"),
            Some(ContentType::Json)
        );
    }

    #[test]
    fn test_content_type_rejects_parameters() {
        assert_eq!(ContentType::from_value("application/json; charset=utf-8"), None);
        assert_eq!(ContentType::from_value("application/json;charset=utf-8"), None);
        assert_eq!(ContentType::from_value("text/plain"), None);
        assert_eq!(ContentType::from_value(""), None);
    }

    #[test]
    fn test_decode_empty_body_is_zero_request() {
        let decoded: ExportTraceServiceRequest =
            decode_request(&[], ContentType::Protobuf).unwrap();
        assert!(decoded.resource_spans.is_empty());

        let decoded: ExportTraceServiceRequest = decode_request(&[], ContentType::Json).unwrap();
        assert!(decoded.resource_spans.is_empty());
    }

    #[test]
    fn test_decode_invalid_protobuf() {
        let result: Result<ExportTraceServiceRequest, _> =
            decode_request(b"not valid protobuf", ContentType::Protobuf);
        assert!(matches!(result.unwrap_err(), DecodeError::Protobuf(_)));
    }

    #[test]
    fn test_decode_invalid_json() {
        let result: Result<ExportTraceServiceRequest, _> =
            decode_request(b"not valid json", ContentType::Json);
        assert!(matches!(result.unwrap_err(), DecodeError::Json(_)));
    }

    #[test]
    fn test_encode_response_roundtrip_protobuf() {
        let response = ExportTraceServiceResponse {
            partial_success: None,
        };
        let bytes = encode_response(&response, ContentType::Protobuf).unwrap();
        let decoded: ExportTraceServiceResponse =
            decode_request(&bytes, ContentType::Protobuf).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn test_encode_response_roundtrip_json() {
        let response = ExportTraceServiceResponse {
            partial_success: None,
        };
        let bytes = encode_response(&response, ContentType::Json).unwrap();
        let decoded: ExportTraceServiceResponse = decode_request(&bytes, ContentType::Json).unwrap();
        assert_eq!(response, decoded);
    }
}
