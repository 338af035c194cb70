//! authbridge Protocol Types
//!
//! Defines the line-delimited JSON RPC envelope for host↔worker
//! communication, the in-process [`Value`] model, and the marker codec
//! that carries binary buffers and big integers across the boundary.

pub mod error;
pub mod marker;
pub mod request;
pub mod response;
pub mod value;

pub use error::{ErrorCode, RpcError};
pub use marker::{decode, encode, MarkerError, BIGINT_MARKER, BYTES_MARKER};
pub use request::{CallParams, RpcRequest};
pub use response::RpcResponse;
pub use value::Value;

/// The single RPC method understood by the worker unless configured otherwise.
pub const DEFAULT_METHOD: &str = "libauthCall";
