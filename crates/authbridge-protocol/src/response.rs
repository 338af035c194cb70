//! RPC response types.

use serde::{Deserialize, Serialize};
use crate::error::RpcError;

/// RPC response envelope.
///
/// Exactly one is written per request: `{ id, ok: true, result }` on
/// success or `{ id, ok: false, error }` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Request id echoed from the request (null if it could not be read).
    pub id: serde_json::Value,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Transport-encoded result (present when ok=true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error details (present when ok=false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
