//! SHA-256 based digests.
//!
//! Inputs above [`INLINE_LIMIT`] are hashed on the blocking pool so a large
//! buffer does not stall the single-threaded framing loop.

use std::sync::Arc;

use authbridge_protocol::Value;
use sha2::{Digest, Sha256};

use super::bytes_arg;
use crate::capability::{Capability, Invocation, InvocationError};

const INLINE_LIMIT: usize = 64 * 1024;

fn sha256_once(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn sha256_twice(data: &[u8]) -> Vec<u8> {
    Sha256::digest(Sha256::digest(data)).to_vec()
}

fn digest_capability(digest: fn(&[u8]) -> Vec<u8>) -> Arc<dyn Capability> {
    Arc::new(move |args: Vec<Value>| -> Invocation {
        let data = match bytes_arg(&args, 0, "data") {
            Ok(data) => data,
            Err(e) => return Invocation::Ready(Err(e)),
        };
        if data.len() <= INLINE_LIMIT {
            return Invocation::Ready(Ok(Value::Bytes(digest(data))));
        }

        let data = data.to_vec();
        Invocation::pending(async move {
            tokio::task::spawn_blocking(move || digest(&data))
                .await
                .map(Value::Bytes)
                .map_err(|e| InvocationError::new(format!("digest task failed: {}", e)))
        })
    })
}

/// `sha256(data: bytes) -> bytes`
pub(super) fn sha256() -> Arc<dyn Capability> {
    digest_capability(sha256_once)
}

/// `hash256(data: bytes) -> bytes`, i.e. `sha256(sha256(data))`.
pub(super) fn hash256() -> Arc<dyn Capability> {
    digest_capability(sha256_twice)
}
