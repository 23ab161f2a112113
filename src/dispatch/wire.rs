//! # Forwarding Wire Contract
//!
//! A forwarded request carries everything needed to re-issue it verbatim on
//! the owning node. The response is either a JSON `SuccessResponse<T>`
//! envelope, an `ErrorResponse` envelope with a non-2xx status, or raw bytes
//! named by a `content-disposition` header.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::constants::{limits, DEFAULT_DOWNLOAD_FILE_NAME};
use crate::error::{FlowError, FlowResult};
use crate::models::ExecutorInfo;

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_DISPOSITION: &str = "content-disposition";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispatchMethod {
    Get,
    Post,
}

impl DispatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub method: DispatchMethod,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Lower-cased header names
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl DispatchRequest {
    pub fn new(method: DispatchMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(name.into(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    pub successful: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            successful: true,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub successful: bool,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
}

impl ErrorResponse {
    /// Rebuild the error the owning node raised
    ///
    /// Only caller-facing kinds come back as themselves; anything else (a
    /// persistence or internal failure over there) stays a dispatch failure.
    pub fn to_error(&self) -> Option<FlowError> {
        match (self.kind.as_str(), self.detail.clone()?) {
            ("NotFound", ErrorDetail::NotFound { resource, key, value }) => {
                Some(FlowError::NotFound {
                    resource: resource.into(),
                    key: key.into(),
                    value,
                })
            }
            ("OverLimit", ErrorDetail::OverLimit { metric, limit, message }) => limits::ALL
                .into_iter()
                .find(|known| *known == metric)
                .map(|metric| FlowError::OverLimit {
                    metric,
                    limit,
                    message,
                }),
            ("FinishedTaskNotTerminable", ErrorDetail::FinishedTask { flow_instance_id }) => {
                Some(FlowError::FinishedTaskNotTerminable(flow_instance_id))
            }
            ("AccessDenied", ErrorDetail::Message { text }) => Some(FlowError::AccessDenied(text)),
            ("Validation", ErrorDetail::Message { text }) => Some(FlowError::Validation(text)),
            ("Unsupported", ErrorDetail::Message { text }) => Some(FlowError::Unsupported(text)),
            ("ConsistencyViolation", ErrorDetail::Message { text }) => {
                Some(FlowError::ConsistencyViolation(text))
            }
            _ => None,
        }
    }
}

/// Fields of a caller-facing error, carried next to its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetail {
    NotFound {
        resource: String,
        key: String,
        value: String,
    },
    OverLimit {
        metric: String,
        limit: u64,
        message: String,
    },
    FinishedTask {
        flow_instance_id: i64,
    },
    Message {
        text: String,
    },
}

impl ErrorDetail {
    fn of(error: &FlowError) -> Option<Self> {
        Some(match error {
            FlowError::NotFound { resource, key, value } => Self::NotFound {
                resource: resource.to_string(),
                key: key.to_string(),
                value: value.clone(),
            },
            FlowError::OverLimit {
                metric,
                limit,
                message,
            } => Self::OverLimit {
                metric: metric.to_string(),
                limit: *limit,
                message: message.clone(),
            },
            FlowError::FinishedTaskNotTerminable(id) => Self::FinishedTask {
                flow_instance_id: *id,
            },
            FlowError::AccessDenied(text)
            | FlowError::Validation(text)
            | FlowError::Unsupported(text)
            | FlowError::ConsistencyViolation(text) => Self::Message { text: text.clone() },
            _ => return None,
        })
    }
}

/// File bytes plus the name they should be saved under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryDataResult {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Response of the owning node, relayed to the caller unchanged
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content: Vec<u8>,
    /// Node that produced the response
    pub origin: ExecutorInfo,
}

impl DispatchResponse {
    pub fn success<T: Serialize>(data: &T, origin: ExecutorInfo) -> FlowResult<Self> {
        let content = serde_json::to_vec(&SuccessResponse::ok(data))?;
        Ok(Self {
            status: 200,
            headers: BTreeMap::from([(CONTENT_TYPE.to_string(), "application/json".to_string())]),
            content,
            origin,
        })
    }

    pub fn failure(error: &FlowError, origin: ExecutorInfo) -> Self {
        let envelope = ErrorResponse {
            successful: false,
            kind: error.kind().to_string(),
            message: error.to_string(),
            detail: ErrorDetail::of(error),
        };
        Self {
            status: status_for(error),
            headers: BTreeMap::from([(CONTENT_TYPE.to_string(), "application/json".to_string())]),
            content: serde_json::to_vec(&envelope).unwrap_or_default(),
            origin,
        }
    }

    pub fn attachment(data: BinaryDataResult, origin: ExecutorInfo) -> Self {
        let disposition = format!(
            "attachment; filename*=UTF-8''{}",
            percent_encode(&data.file_name)
        );
        Self {
            status: 200,
            headers: BTreeMap::from([
                (CONTENT_TYPE.to_string(), "application/octet-stream".to_string()),
                (CONTENT_DISPOSITION.to_string(), disposition),
            ]),
            content: data.content,
            origin,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode a `SuccessResponse<T>` envelope
    pub fn content_by_type<T: DeserializeOwned>(&self) -> FlowResult<T> {
        self.check_status()?;
        let envelope: SuccessResponse<T> = serde_json::from_slice(&self.content)?;
        if !envelope.successful {
            return Err(self.remote_error("remote node reported an unsuccessful response"));
        }
        Ok(envelope.data)
    }

    /// Raw bytes with the file name taken from `content-disposition`
    pub fn binary(self) -> FlowResult<BinaryDataResult> {
        self.check_status()?;
        let file_name = self
            .header(CONTENT_DISPOSITION)
            .and_then(file_name_from_disposition)
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_FILE_NAME.to_string());
        Ok(BinaryDataResult {
            file_name,
            content: self.content,
        })
    }

    fn check_status(&self) -> FlowResult<()> {
        if self.is_success() {
            return Ok(());
        }
        let error = match serde_json::from_slice::<ErrorResponse>(&self.content) {
            Ok(envelope) => envelope.to_error().unwrap_or_else(|| {
                self.remote_error(format!(
                    "HTTP {}: {}: {}",
                    self.status, envelope.kind, envelope.message
                ))
            }),
            Err(_) => self.remote_error(format!(
                "HTTP {}: {}",
                self.status,
                String::from_utf8_lossy(&self.content)
            )),
        };
        Err(error)
    }

    fn remote_error(&self, message: impl Into<String>) -> FlowError {
        FlowError::remote(&self.origin.host, self.origin.port, message)
    }
}

/// HTTP status an error is answered with on the receiving node
pub fn status_for(error: &FlowError) -> u16 {
    match error {
        FlowError::NotFound { .. } => 404,
        FlowError::AccessDenied(_) => 403,
        FlowError::Validation(_)
        | FlowError::OverLimit { .. }
        | FlowError::Unsupported(_)
        | FlowError::FinishedTaskNotTerminable(_) => 400,
        _ => 500,
    }
}

/// `filename*=` (RFC 5987) wins over a plain `filename=`
pub fn file_name_from_disposition(disposition: &str) -> Option<String> {
    let mut plain = None;
    for part in disposition.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value
                    .split_once("''")
                    .map(|(_, encoded)| encoded)
                    .unwrap_or(value);
                let decoded = percent_decode(encoded.trim_matches('"'));
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
            "filename" => {
                let name = value.trim().trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let high = char::from(bytes[i + 1]).to_digit(16);
            let low = char::from(bytes[i + 2]).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                decoded.push((high * 16 + low) as u8);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
