//! Built-in capability library.
//!
//! Exposed through the same namespace/allowlist machinery as any embedded
//! library. Arguments arrive already marker-decoded, so binary parameters
//! are [`Value::Bytes`] and integers beyond JSON range are
//! [`Value::BigInt`].

mod bigint;
mod ed25519;
mod encoding;
mod hash;

use authbridge_protocol::Value;
use num_bigint::BigInt;

use crate::capability::{InvocationError, Member, Namespace};

/// Every capability path the built-in library provides.
pub const NAMES: &[&str] = &[
    "hexToBin",
    "binToHex",
    "sha256",
    "hash256",
    "ed25519.generatePrivateKey",
    "ed25519.derivePublicKey",
    "ed25519.sign",
    "ed25519.verify",
    "bigint.add",
    "bigint.mul",
    "bigint.fromBytes",
    "bigint.toBytes",
];

/// Build the built-in namespace.
pub fn namespace() -> Namespace {
    Namespace::new()
        .with("hexToBin", Member::function(encoding::hex_to_bin))
        .with("binToHex", Member::function(encoding::bin_to_hex))
        .with("sha256", Member::Function(hash::sha256()))
        .with("hash256", Member::Function(hash::hash256()))
        .with("ed25519", Member::Namespace(ed25519::namespace()))
        .with("bigint", Member::Namespace(bigint::namespace()))
}

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value, InvocationError> {
    args.get(index).ok_or_else(|| {
        InvocationError::new(format!("missing argument {} ({})", index, name))
    })
}

fn type_error(index: usize, name: &str, expected: &str, got: &Value) -> InvocationError {
    InvocationError::new(format!(
        "argument {} ({}) must be {}, got {}",
        index,
        name,
        expected,
        got.kind()
    ))
}

fn bytes_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a [u8], InvocationError> {
    let value = arg(args, index, name)?;
    value
        .as_bytes()
        .ok_or_else(|| type_error(index, name, "bytes", value))
}

fn str_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str, InvocationError> {
    let value = arg(args, index, name)?;
    value
        .as_str()
        .ok_or_else(|| type_error(index, name, "a string", value))
}

/// Integers may arrive as a `bigint` marker or as a plain JSON integer.
fn int_arg(args: &[Value], index: usize, name: &str) -> Result<BigInt, InvocationError> {
    let value = arg(args, index, name)?;
    match value {
        Value::BigInt(n) => Ok(n.clone()),
        Value::Number(n) => n
            .as_i64()
            .map(BigInt::from)
            .or_else(|| n.as_u64().map(BigInt::from))
            .ok_or_else(|| type_error(index, name, "an integer", value)),
        other => Err(type_error(index, name, "an integer", other)),
    }
}

/// Fixed-length byte argument, e.g. a 32-byte key.
fn array_arg<const N: usize>(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<[u8; N], InvocationError> {
    let bytes = bytes_arg(args, index, name)?;
    bytes.try_into().map_err(|_| {
        InvocationError::new(format!(
            "argument {} ({}) must be {} bytes, got {}",
            index,
            name,
            N,
            bytes.len()
        ))
    })
}
