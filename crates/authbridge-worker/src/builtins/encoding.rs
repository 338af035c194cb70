//! Hex helpers.

use authbridge_protocol::Value;

use super::{bytes_arg, str_arg};
use crate::capability::InvocationError;

/// `hexToBin(hex: string) -> bytes`
pub(super) fn hex_to_bin(args: Vec<Value>) -> Result<Value, InvocationError> {
    let hex_str = str_arg(&args, 0, "hex")?;
    hex::decode(hex_str)
        .map(Value::Bytes)
        .map_err(|e| InvocationError::new(format!("invalid hex string: {}", e)))
}

/// `binToHex(bin: bytes) -> string`
pub(super) fn bin_to_hex(args: Vec<Value>) -> Result<Value, InvocationError> {
    let bytes = bytes_arg(&args, 0, "bin")?;
    Ok(Value::String(hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_bin() {
        let out = hex_to_bin(vec![Value::from("00ffAB")]).unwrap();
        assert_eq!(out, Value::Bytes(vec![0x00, 0xff, 0xab]));
    }

    #[test]
    fn test_hex_to_bin_rejects_odd_length() {
        let err = hex_to_bin(vec![Value::from("AAABBBCCCDDDEEEFFF000111222")]).unwrap_err();
        assert!(err.message.starts_with("invalid hex string"));
    }

    #[test]
    fn test_bin_to_hex_is_lowercase() {
        let out = bin_to_hex(vec![Value::Bytes(vec![0xAA, 0x0B])]).unwrap();
        assert_eq!(out, Value::from("aa0b"));
    }

    #[test]
    fn test_bin_to_hex_requires_bytes() {
        let err = bin_to_hex(vec![Value::from("aa")]).unwrap_err();
        assert_eq!(err.message, "argument 0 (bin) must be bytes, got string");
    }
}
