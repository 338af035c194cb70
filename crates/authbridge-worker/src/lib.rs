//! authbridge Worker
//!
//! A long-lived child process that exposes an allowlisted set of library
//! capabilities over line-delimited JSON RPC on stdin/stdout.
//!
//! This crate can be used in two modes:
//! - **Standalone binary**: spawned by a host process
//! - **In-process library**: the framing loop runs over any async reader
//!   and writer, which is how the integration tests drive it

pub mod builtins;
pub mod capability;
pub mod config;
pub mod dispatcher;
pub mod rpc;

use std::sync::Arc;

pub use capability::{
    Allowlist, Capability, CapabilityTable, Invocation, InvocationError, Member, Namespace,
    ResolveError, Resolver,
};
pub use config::{ConfigError, ShutdownPolicy, WorkerConfig};
pub use dispatcher::{DispatchError, Dispatcher};
pub use rpc::{RpcHandler, RunSummary};

/// Bind `namespace` against the configured allowlist and build a handler.
///
/// Honors `strict_allowlist`: in strict mode any allowlisted name that does
/// not resolve to a function is a startup error.
pub fn build_handler(config: &WorkerConfig, namespace: Namespace) -> Result<RpcHandler, ResolveError> {
    let resolver = Resolver::new(Arc::new(namespace), config.allowlist());
    let table = CapabilityTable::bind(&resolver, config.strict_allowlist)?;
    tracing::debug!(bound = ?table.bound_names(), "capability table bound");
    Ok(RpcHandler::new(config, Dispatcher::new(Arc::new(table))))
}
