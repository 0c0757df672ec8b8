use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::transport::HttpResponse;

/// Correlation id headers, checked in order.
pub const REQUEST_ID_HEADERS: [&str; 3] = ["x-request-id", "openai-request-id", "cf-ray"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageApiErrorKind {
    Config,
    Transport,
    UpstreamHttp,
    Decode,
}

#[derive(Debug, Error)]
pub enum ImageApiError {
    #[error("{message}")]
    Config { message: String },
    #[error("{operation} transport failed after {attempts} attempt(s): {message}")]
    Transport {
        operation: &'static str,
        attempts: u32,
        timed_out: bool,
        message: String,
    },
    #[error("{operation} failed: {error}")]
    UpstreamHttp {
        operation: &'static str,
        error: UpstreamError,
    },
    #[error("{operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl ImageApiError {
    pub fn kind(&self) -> ImageApiErrorKind {
        match self {
            Self::Config { .. } => ImageApiErrorKind::Config,
            Self::Transport { .. } => ImageApiErrorKind::Transport,
            Self::UpstreamHttp { .. } => ImageApiErrorKind::UpstreamHttp,
            Self::Decode { .. } => ImageApiErrorKind::Decode,
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamHttp { error, .. } => Some(error.http_status),
            _ => None,
        }
    }

    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Self::UpstreamHttp { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timed_out: true, .. })
    }

    pub(crate) fn decode(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            message: message.into(),
        }
    }
}

/// Normalized non-2xx response from the image API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub http_status: u16,
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub param: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
}

impl UpstreamError {
    /// Reads `{error:{message,type,code,param}}`; bodies that are not JSON
    /// are treated as empty.
    pub fn from_response(response: &HttpResponse) -> Self {
        let payload = serde_json::from_slice::<Value>(&response.body).unwrap_or(Value::Null);
        let detail = payload.get("error");
        let field = |key: &str| {
            detail
                .and_then(|row| row.get(key))
                .and_then(value_to_text)
        };
        let message = field("message").unwrap_or_else(|| fallback_message(response.status));

        Self {
            http_status: response.status,
            error_type: field("type"),
            code: field("code"),
            param: field("param"),
            message,
            request_id: request_id_from(response),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status={}", self.http_status)?;
        if let Some(error_type) = &self.error_type {
            write!(f, " type={error_type}")?;
        }
        if let Some(code) = &self.code {
            write!(f, " code={code}")?;
        }
        if let Some(param) = &self.param {
            write!(f, " param={param}")?;
        }
        write!(f, " message={}", self.message)?;
        if let Some(request_id) = &self.request_id {
            write!(f, " request_id={request_id}")?;
        }
        Ok(())
    }
}

pub fn request_id_from(response: &HttpResponse) -> Option<String> {
    REQUEST_ID_HEADERS
        .iter()
        .filter_map(|name| response.header(name))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn fallback_message(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("upstream returned HTTP {status}"))
}
