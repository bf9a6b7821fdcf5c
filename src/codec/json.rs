//! OTLP/JSON marshaling with the hex identifier convention
//!
//! The OTLP/JSON wire format writes `trace_id` and `span_id` values as
//! hexadecimal, where canonical protobuf-JSON writers emit base64 for `bytes`
//! fields. The functions here isolate that divergence in one place: messages
//! are serialized through their serde representation, then an in-place walk
//! over the dynamic JSON tree normalizes every identifier-shaped value.
//!
//! Identifier keys are detected by a case- and underscore-insensitive
//! substring match on `traceid`/`spanid`, so `traceId`, `trace_id` and
//! `parent_span_id` are all covered, as are identifier-shaped keys added by
//! future schema revisions. Normalization is tolerant by design: a value that
//! is not a string, does not parse, or has an unexpected byte length logs a
//! warning and passes through untouched rather than failing the operation.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Error produced by JSON marshaling or unmarshaling.
#[derive(Debug, Error)]
pub enum JsonCodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Marshal a message to OTLP/JSON.
pub fn marshal_json<T: Serialize>(message: &T) -> Result<Vec<u8>, JsonCodecError> {
    let mut value = serde_json::to_value(message)?;
    normalize_ids(&mut value, HexCase::Upper);
    Ok(serde_json::to_vec(&value)?)
}

/// Marshal a message to indented OTLP/JSON.
pub fn marshal_json_pretty<T: Serialize>(
    message: &T,
    indent: &str,
) -> Result<Vec<u8>, JsonCodecError> {
    let mut value = serde_json::to_value(message)?;
    normalize_ids(&mut value, HexCase::Upper);
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Unmarshal a message from OTLP/JSON.
///
/// Identifier values in either hex or base64 form are accepted; base64 inputs
/// (as produced by canonical protobuf-JSON writers) are converted to hex
/// before the message-level decode runs.
pub fn unmarshal_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, JsonCodecError> {
    let mut value: Value = serde_json::from_slice(data)?;
    normalize_ids(&mut value, HexCase::Lower);
    Ok(serde_json::from_value(value)?)
}

/// Streaming OTLP/JSON encoder sharing one output sink.
pub struct JsonEncoder<W: Write> {
    writer: W,
    indent: Option<String>,
}

impl<W: Write> JsonEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            indent: None,
        }
    }

    /// Indent subsequent documents with the given string.
    pub fn set_indent(&mut self, indent: &str) {
        self.indent = Some(indent.to_owned());
    }

    pub fn encode<T: Serialize>(&mut self, message: &T) -> Result<(), JsonCodecError> {
        let data = match &self.indent {
            Some(indent) => marshal_json_pretty(message, indent)?,
            None => marshal_json(message)?,
        };
        self.writer.write_all(&data)?;
        Ok(())
    }
}

/// Streaming OTLP/JSON decoder sharing one input source.
///
/// The source may hold a sequence of concatenated JSON documents;
/// [`JsonDecoder::decode`] returns `Ok(None)` once the source is exhausted.
pub struct JsonDecoder<R: Read> {
    stream: serde_json::StreamDeserializer<'static, serde_json::de::IoRead<R>, Value>,
}

impl<R: Read> JsonDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            stream: serde_json::Deserializer::from_reader(reader).into_iter(),
        }
    }

    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, JsonCodecError> {
        let Some(value) = self.stream.next().transpose()? else {
            return Ok(None);
        };
        let mut value = value;
        normalize_ids(&mut value, HexCase::Lower);
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[derive(Debug, Clone, Copy)]
enum HexCase {
    Upper,
    Lower,
}

/// Expected identifier width in bytes, if the key names a trace or span id.
fn id_key_width(key: &str) -> Option<usize> {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if normalized.contains("traceid") {
        Some(16)
    } else if normalized.contains("spanid") {
        Some(8)
    } else {
        None
    }
}

fn decode_id_text(text: &str, expected: usize) -> Option<Vec<u8>> {
    // Hex of the expected width wins; a 24-char base64 id made entirely of
    // hex digits would otherwise be misread.
    if text.len() == expected * 2 {
        if let Ok(bytes) = hex::decode(text) {
            return Some(bytes);
        }
    }
    if let Ok(bytes) = BASE64.decode(text) {
        return Some(bytes);
    }
    hex::decode(text).ok()
}

fn normalize_ids(value: &mut Value, case: HexCase) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let Some(expected) = id_key_width(key) else {
                    normalize_ids(child, case);
                    continue;
                };
                match child {
                    Value::String(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        match decode_id_text(text, expected) {
                            Some(bytes) if bytes.len() == expected => {
                                let hex = match case {
                                    HexCase::Upper => hex::encode_upper(&bytes),
                                    HexCase::Lower => hex::encode(&bytes),
                                };
                                *child = Value::String(hex);
                            }
                            Some(bytes) => {
                                tracing::warn!(
                                    key = %key,
                                    len = bytes.len(),
                                    expected,
                                    "identifier has unexpected length, leaving value unchanged"
                                );
                            }
                            None => {
                                tracing::warn!(
                                    key = %key,
                                    "identifier is neither hex nor base64, leaving value unchanged"
                                );
                            }
                        }
                    }
                    Value::Null => {}
                    other => {
                        tracing::warn!(key = %key, "unexpected identifier value type");
                        normalize_ids(other, case);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_ids(item, case);
            }
        }
        _ => {}
    }
}
