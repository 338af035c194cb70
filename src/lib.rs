//! authbridge - host side of the capability worker bridge
//!
//! The worker (`authbridge-worker`) exposes an allowlisted set of library
//! capabilities over line-delimited JSON RPC on stdin/stdout. This crate
//! spawns it and turns calls into awaited results, carrying binary buffers
//! and big integers across the boundary with the marker codec.

pub mod client;

pub use authbridge_protocol::{decode, encode, ErrorCode, MarkerError, RpcError, Value};
pub use client::{BridgeClient, ClientError, DEFAULT_TIMEOUT};
