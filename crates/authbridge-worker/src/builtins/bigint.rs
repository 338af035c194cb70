//! Arbitrary-precision integer helpers.

use authbridge_protocol::Value;
use num_bigint::{BigInt, Sign};
use num_traits::Signed;

use super::{bytes_arg, int_arg};
use crate::capability::{InvocationError, Member, Namespace};

pub(super) fn namespace() -> Namespace {
    Namespace::new()
        .with("add", Member::function(add))
        .with("mul", Member::function(mul))
        .with("fromBytes", Member::function(from_bytes))
        .with("toBytes", Member::function(to_bytes))
}

fn add(args: Vec<Value>) -> Result<Value, InvocationError> {
    Ok(Value::BigInt(int_arg(&args, 0, "a")? + int_arg(&args, 1, "b")?))
}

fn mul(args: Vec<Value>) -> Result<Value, InvocationError> {
    Ok(Value::BigInt(int_arg(&args, 0, "a")? * int_arg(&args, 1, "b")?))
}

/// Unsigned big-endian bytes to integer. Empty input is zero.
fn from_bytes(args: Vec<Value>) -> Result<Value, InvocationError> {
    let bytes = bytes_arg(&args, 0, "bin")?;
    Ok(Value::BigInt(BigInt::from_bytes_be(Sign::Plus, bytes)))
}

/// Non-negative integer to minimal unsigned big-endian bytes (zero is `00`).
fn to_bytes(args: Vec<Value>) -> Result<Value, InvocationError> {
    let n = int_arg(&args, 0, "n")?;
    if n.is_negative() {
        return Err(InvocationError::new(format!(
            "cannot encode negative integer {} as unsigned bytes",
            n
        )));
    }
    let (_, bytes) = n.to_bytes_be();
    Ok(Value::Bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(s: &str) -> Value {
        Value::BigInt(s.parse().unwrap())
    }

    #[test]
    fn test_add_beyond_u64() {
        let out = add(vec![big("18446744073709551615"), Value::from(1u64)]).unwrap();
        assert_eq!(out, big("18446744073709551616"));
    }

    #[test]
    fn test_mul_negative() {
        let out = mul(vec![big("-3"), big("100000000000000000000")]).unwrap();
        assert_eq!(out, big("-300000000000000000000"));
    }

    #[test]
    fn test_bytes_round_trip() {
        let n = from_bytes(vec![Value::Bytes(vec![0x01, 0x00, 0x00])]).unwrap();
        assert_eq!(n, big("65536"));
        assert_eq!(to_bytes(vec![n]).unwrap(), Value::Bytes(vec![0x01, 0x00, 0x00]));
    }

    #[test]
    fn test_zero_encodes_to_single_byte() {
        assert_eq!(from_bytes(vec![Value::Bytes(vec![])]).unwrap(), big("0"));
        assert_eq!(to_bytes(vec![big("0")]).unwrap(), Value::Bytes(vec![0]));
    }

    #[test]
    fn test_negative_to_bytes_fails() {
        let err = to_bytes(vec![big("-1")]).unwrap_err();
        assert!(err.message.contains("negative"));
    }
}
