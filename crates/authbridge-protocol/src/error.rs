//! Error types for the RPC protocol.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::fmt;

/// Error codes carried in `error.details.code`.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The input line was not valid JSON.
    InvalidJson,
    /// The envelope named a method other than the supported one.
    UnknownMethod,
    /// Missing or malformed envelope fields or call parameters.
    InvalidRequest,
    /// The function name is not in the allowlist.
    CapabilityNotAllowed,
    /// An allowlisted path does not exist in the capability namespace.
    CapabilityNotFound,
    /// An allowlisted path exists but is not invocable.
    CapabilityNotCallable,
    /// A `hexbytes` or `bigint` marker carried a malformed payload.
    MarkerFormat,
    /// The invoked capability itself failed.
    InvocationFailed,
    /// The per-request task faulted unexpectedly.
    InternalError,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::UnknownMethod => "UNKNOWN_METHOD",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::CapabilityNotAllowed => "CAPABILITY_NOT_ALLOWED",
            Self::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            Self::CapabilityNotCallable => "CAPABILITY_NOT_CALLABLE",
            Self::MarkerFormat => "MARKER_FORMAT",
            Self::InvocationFailed => "INVOCATION_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC error payload: `{ message, details }`.
///
/// `details` always carries the error `code`; the remaining keys depend on
/// the kind of failure (`fn`, `line`, `got`, `allowed`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Human-readable, single-line error message.
    pub message: String,
    /// Machine-readable details.
    #[serde(default)]
    pub details: Map<String, serde_json::Value>,
}

impl RpcError {
    /// Create a new RPC error tagged with `code`.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut details = Map::new();
        details.insert("code".to_string(), json!(code.as_str()));
        Self {
            message: message.into(),
            details,
        }
    }

    /// Add a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// The error code recorded in `details`, if it is one we know.
    pub fn code(&self) -> Option<ErrorCode> {
        self.details
            .get("code")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
    }

    /// Create an INVALID_JSON error for a line that failed to parse.
    pub fn invalid_json(line: &str, reason: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidJson, "Invalid JSON")
            .with_detail("line", json!(line))
            .with_detail("reason", json!(reason.to_string()))
    }

    /// Create an UNKNOWN_METHOD error.
    pub fn unknown_method(got: &serde_json::Value, allowed: &str) -> Self {
        Self::new(ErrorCode::UnknownMethod, "Unknown method")
            .with_detail("got", got.clone())
            .with_detail("allowed", json!([allowed]))
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RpcError {}
