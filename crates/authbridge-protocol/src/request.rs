//! RPC request types.

use serde::{Deserialize, Serialize};

/// RPC request envelope: `{ id, method, params }`.
///
/// Every field is kept as raw JSON so that any JSON object parses; the
/// framing loop decides what is valid. `id` is echoed verbatim and is
/// otherwise meaningless to the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen correlation id. Missing ids read as null.
    #[serde(default)]
    pub id: serde_json::Value,
    /// Method name. Must equal the worker's configured method.
    #[serde(default)]
    pub method: serde_json::Value,
    /// Method parameters (see [`CallParams`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    /// Read an envelope from parsed JSON.
    ///
    /// Only objects are envelopes. The derived `Deserialize` would also read
    /// an array positionally as `[id, method, params]`, so arrays and
    /// scalars are rejected here before deserializing.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }

    /// Build a call request for `fn_name`.
    pub fn call(
        id: serde_json::Value,
        method: &str,
        fn_name: &str,
        args: serde_json::Value,
    ) -> Self {
        Self {
            id,
            method: serde_json::Value::String(method.to_string()),
            params: Some(serde_json::json!({ "fn": fn_name, "args": args })),
        }
    }

    /// The method name, if it is a string.
    pub fn method_name(&self) -> Option<&str> {
        self.method.as_str()
    }
}

/// Parameters of the call method: `{ fn, args }`.
///
/// `args` is either an array (spread positionally) or a single value
/// (passed as one argument). It stays in transport form until the
/// dispatcher decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    /// Dotted capability path, e.g. `ed25519.sign`.
    #[serde(rename = "fn")]
    pub fn_name: String,
    /// Transport-encoded arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}
