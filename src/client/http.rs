//! HTTP upload path
//!
//! One short-lived POST per upload: the export request is encoded per the
//! signal's protocol, signal headers and user-agent ride on the request, and
//! the response is decoded by its own `Content-Type`. Any status other than
//! 200 is an error.

use prost::Message;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::json::{marshal_json, unmarshal_json};
use crate::codec::ContentType;

use super::config::SignalOptions;
use super::error::UploadError;

pub(crate) async fn send_http<Req, Resp>(
    client: &reqwest::Client,
    options: &SignalOptions,
    content_type: ContentType,
    request: &Req,
) -> Result<Resp, UploadError>
where
    Req: Message + Serialize,
    Resp: Message + Default + DeserializeOwned,
{
    let body = match content_type {
        ContentType::Protobuf => request.encode_to_vec(),
        ContentType::Json => marshal_json(request)?,
    };

    let mut builder = client
        .post(options.endpoint.clone())
        .header(header::CONTENT_TYPE, content_type.as_header_value())
        .header(header::USER_AGENT, options.user_agent.as_str());
    for (key, value) in &options.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }

    let response = builder.body(body).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(UploadError::UnexpectedStatus(status.as_u16()));
    }

    let response_content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let bytes = response.bytes().await?;
    match ContentType::from_value(&response_content_type) {
        Some(ContentType::Protobuf) => {
            Resp::decode(bytes.as_ref()).map_err(|e| UploadError::Decode(e.to_string()))
        }
        Some(ContentType::Json) => {
            unmarshal_json(bytes.as_ref()).map_err(|e| UploadError::Decode(e.to_string()))
        }
        None => Err(UploadError::UnexpectedContentType(response_content_type)),
    }
}
