//! Request dispatcher.
//!
//! Validates call parameters, looks the capability up in the bound table,
//! decodes arguments, invokes, awaits a pending result and re-encodes it.
//! Every expected failure comes back as a [`DispatchError`]; mapping it to a
//! response is the framing loop's job.

use std::sync::Arc;

use authbridge_protocol::{
    decode, encode, CallParams, ErrorCode, MarkerError, RpcError, Value,
};
use serde_json::json;
use thiserror::Error;

use crate::capability::{CapabilityTable, InvocationError, ResolveError};

/// Dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("invalid argument marker: {0}")]
    Marker(#[from] MarkerError),

    #[error("{fn_name} failed: {source}")]
    Invocation {
        fn_name: String,
        #[source]
        source: InvocationError,
    },
}

impl DispatchError {
    /// Stable error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Resolve(ResolveError::NotAllowed(_)) => ErrorCode::CapabilityNotAllowed,
            Self::Resolve(ResolveError::NotFound { .. }) => ErrorCode::CapabilityNotFound,
            Self::Resolve(ResolveError::NotCallable { .. }) => ErrorCode::CapabilityNotCallable,
            Self::Marker(_) => ErrorCode::MarkerFormat,
            Self::Invocation { .. } => ErrorCode::InvocationFailed,
        }
    }

    /// Convert to the wire error, attaching `fn` when the caller knows it.
    pub fn to_rpc_error(&self, fn_name: Option<&str>) -> RpcError {
        let err = RpcError::new(self.code(), self.to_string());
        let err = match fn_name {
            Some(name) => err.with_detail("fn", json!(name)),
            None => err,
        };
        match self {
            Self::Invocation { source, .. } => err.with_detail("cause", json!(source.message)),
            _ => err,
        }
    }
}

/// Validate raw `params` into [`CallParams`].
pub fn parse_params(params: Option<serde_json::Value>) -> Result<CallParams, DispatchError> {
    let mut params = match params {
        Some(serde_json::Value::Object(map)) => map,
        Some(_) => {
            return Err(DispatchError::InvalidRequest(
                "params must be an object".to_string(),
            ))
        }
        None => return Err(DispatchError::InvalidRequest("params is required".to_string())),
    };

    let fn_name = match params.remove("fn") {
        Some(serde_json::Value::String(name)) if !name.is_empty() => name,
        _ => {
            return Err(DispatchError::InvalidRequest(
                "fn is required and must be a non-empty string".to_string(),
            ))
        }
    };

    Ok(CallParams {
        fn_name,
        args: params.remove("args").unwrap_or(serde_json::Value::Null),
    })
}

/// Routes calls to capabilities. Cheap to clone; shared by every request task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<CapabilityTable>,
}

impl Dispatcher {
    pub fn new(table: Arc<CapabilityTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Dispatch one call and return the transport-encoded result.
    pub async fn dispatch(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError> {
        let CallParams { fn_name, args } = parse_params(params)?;
        let capability = self.table.lookup(&fn_name)?;

        let args = match decode(args)? {
            Value::Array(items) => items,
            single => vec![single],
        };

        tracing::trace!(fn_name = %fn_name, argc = args.len(), "invoking capability");
        let result = capability
            .invoke(args)
            .settle()
            .await
            .map_err(|source| DispatchError::Invocation { fn_name, source })?;

        Ok(encode(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Allowlist, Member, Namespace, Resolver};
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let ns = Namespace::new()
            .with("argc", Member::function(|args| Ok(Value::from(args.len() as u64))))
            .with("first", Member::function(|args| {
                args.into_iter()
                    .next()
                    .ok_or_else(|| InvocationError::new("no arguments"))
            }))
            .with("later", Member::async_function(|args| async move {
                tokio::task::yield_now().await;
                Ok::<_, InvocationError>(Value::Array(args))
            }))
            .with("fails", Member::async_function(|_args| async move {
                Err::<Value, _>(InvocationError::new("boom"))
            }))
            .with("PI", Member::Constant(Value::from("3.14")));
        let allow = Allowlist::new(["argc", "first", "later", "fails", "PI", "missing"]);
        let table = CapabilityTable::bind(&Resolver::new(Arc::new(ns), allow), false).unwrap();
        Dispatcher::new(Arc::new(table))
    }

    #[tokio::test]
    async fn test_array_args_are_spread() {
        let out = dispatcher()
            .dispatch(Some(json!({"fn": "argc", "args": [1, 2, 3]})))
            .await
            .unwrap();
        assert_eq!(out, json!(3));
    }

    #[tokio::test]
    async fn test_object_args_are_one_argument() {
        let d = dispatcher();
        let out = d
            .dispatch(Some(json!({"fn": "argc", "args": {"privateKey": {"hexbytes": "11"}}})))
            .await
            .unwrap();
        assert_eq!(out, json!(1));

        let echoed = d
            .dispatch(Some(json!({"fn": "first", "args": {"privateKey": {"hexbytes": "11"}}})))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"privateKey": {"hexbytes": "11"}}));
    }

    #[tokio::test]
    async fn test_missing_args_is_single_null() {
        let out = dispatcher()
            .dispatch(Some(json!({"fn": "first"})))
            .await
            .unwrap();
        assert_eq!(out, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_pending_result_is_awaited_and_encoded() {
        let out = dispatcher()
            .dispatch(Some(json!({"fn": "later", "args": [{"bigint": "-99999999999999999999"}]})))
            .await
            .unwrap();
        assert_eq!(out, json!([{"bigint": "-99999999999999999999"}]));
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let d = dispatcher();
        for params in [None, Some(json!([])), Some(json!({})), Some(json!({"fn": ""})), Some(json!({"fn": 3}))] {
            let err = d.dispatch(params).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidRequest);
        }
    }

    #[tokio::test]
    async fn test_resolution_errors_are_distinct() {
        let d = dispatcher();
        let not_allowed = d.dispatch(Some(json!({"fn": "secret"}))).await.unwrap_err();
        assert_eq!(not_allowed.code(), ErrorCode::CapabilityNotAllowed);
        let not_found = d.dispatch(Some(json!({"fn": "missing"}))).await.unwrap_err();
        assert_eq!(not_found.code(), ErrorCode::CapabilityNotFound);
        let not_callable = d.dispatch(Some(json!({"fn": "PI"}))).await.unwrap_err();
        assert_eq!(not_callable.code(), ErrorCode::CapabilityNotCallable);
    }

    #[tokio::test]
    async fn test_marker_error() {
        let err = dispatcher()
            .dispatch(Some(json!({"fn": "argc", "args": [{"bigint": "12a"}]})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MarkerFormat);
    }

    #[tokio::test]
    async fn test_rejection_carries_message() {
        let err = dispatcher()
            .dispatch(Some(json!({"fn": "fails"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvocationFailed);

        let rpc = err.to_rpc_error(Some("fails"));
        assert_eq!(rpc.details["fn"], "fails");
        assert_eq!(rpc.details["cause"], "boom");
        assert_eq!(rpc.details["code"], "INVOCATION_FAILED");
        assert_eq!(rpc.message, "fails failed: boom");
    }
}
