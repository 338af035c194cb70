//! Marker codec.
//!
//! JSON has no native representation for binary buffers or big integers, so
//! both travel as single-key *marker objects*:
//!
//! ```text
//! {"hexbytes": "deadbeef"}    <->  Value::Bytes([0xde, 0xad, 0xbe, 0xef])
//! {"bigint": "-12345678901"}  <->  Value::BigInt(-12345678901)
//! ```
//!
//! Marker recognition is purely structural: an object is a marker only if it
//! has exactly one key and that key is one of the two reserved names. The
//! payload is never inspected to decide whether something is a marker.

use std::sync::OnceLock;

use num_bigint::BigInt;
use regex_lite::Regex;
use thiserror::Error;

use crate::value::Value;

/// Reserved key for binary buffers.
pub const BYTES_MARKER: &str = "hexbytes";

/// Reserved key for arbitrary-precision integers.
pub const BIGINT_MARKER: &str = "bigint";

/// Malformed marker payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    #[error("{marker} marker must be a string, got {got}")]
    NotAString {
        marker: &'static str,
        got: &'static str,
    },

    #[error("hexbytes marker is not valid hex: {0}")]
    InvalidHex(String),

    #[error("bigint marker must be a base-10 integer string, got {0:?}")]
    InvalidBigInt(String),
}

fn decimal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^-?[0-9]+$").expect("decimal pattern is valid"))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Decode a transport value (inbound, JSON → internal).
pub fn decode(json: serde_json::Value) -> Result<Value, MarkerError> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => Ok(Value::Number(n)),
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(payload) = map.get(BYTES_MARKER) {
                    return decode_bytes(payload);
                }
                if let Some(payload) = map.get(BIGINT_MARKER) {
                    return decode_bigint(payload);
                }
            }
            map.into_iter()
                .map(|(k, v)| decode(v).map(|v| (k, v)))
                .collect::<Result<_, _>>()
                .map(Value::Object)
        }
    }
}

fn decode_bytes(payload: &serde_json::Value) -> Result<Value, MarkerError> {
    let hex_str = payload.as_str().ok_or(MarkerError::NotAString {
        marker: BYTES_MARKER,
        got: json_kind(payload),
    })?;
    hex::decode(hex_str)
        .map(Value::Bytes)
        .map_err(|e| MarkerError::InvalidHex(e.to_string()))
}

fn decode_bigint(payload: &serde_json::Value) -> Result<Value, MarkerError> {
    let dec = payload.as_str().ok_or(MarkerError::NotAString {
        marker: BIGINT_MARKER,
        got: json_kind(payload),
    })?;
    if !decimal_pattern().is_match(dec) {
        return Err(MarkerError::InvalidBigInt(dec.to_string()));
    }
    BigInt::parse_bytes(dec.as_bytes(), 10)
        .map(Value::BigInt)
        .ok_or_else(|| MarkerError::InvalidBigInt(dec.to_string()))
}

/// Encode an internal value (outbound, internal → JSON-safe).
pub fn encode(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(encode).collect()),
        Value::Object(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), encode(v))).collect(),
        ),
        Value::Bytes(bytes) => marker(BYTES_MARKER, hex::encode(bytes)),
        Value::BigInt(n) => marker(BIGINT_MARKER, n.to_str_radix(10)),
    }
}

fn marker(key: &str, payload: String) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(key.to_string(), serde_json::Value::String(payload));
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_decode_bytes_marker() {
        let v = decode(json!({"hexbytes": "DEADbeef"})).unwrap();
        assert_eq!(v, Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_decode_empty_bytes_marker() {
        assert_eq!(decode(json!({"hexbytes": ""})).unwrap(), Value::Bytes(vec![]));
    }

    #[test]
    fn test_decode_bigint_marker() {
        let v = decode(json!({"bigint": "-123456789012345678901234567890"})).unwrap();
        let expected: BigInt = "-123456789012345678901234567890".parse().unwrap();
        assert_eq!(v, Value::BigInt(expected));
    }

    #[test]
    fn test_negative_zero_decodes_to_zero() {
        let v = decode(json!({"bigint": "-0"})).unwrap();
        assert_eq!(encode(&v), json!({"bigint": "0"}));
    }

    #[test]
    fn test_two_key_object_is_not_a_marker() {
        let v = decode(json!({"hexbytes": "deadbeef", "x": 1})).unwrap();
        let map = v.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["hexbytes"], Value::from("deadbeef"));
        assert_eq!(map["x"], Value::Number(1.into()));
    }

    #[test]
    fn test_other_single_key_object_is_not_a_marker() {
        let v = decode(json!({"bytes": "ff"})).unwrap();
        assert_eq!(v, obj(vec![("bytes", Value::from("ff"))]));
    }

    #[test]
    fn test_malformed_bigint_is_an_error() {
        let err = decode(json!({"bigint": "12a"})).unwrap_err();
        assert_eq!(err, MarkerError::InvalidBigInt("12a".to_string()));
    }

    #[test]
    fn test_bigint_rejects_plus_sign_and_whitespace() {
        for bad in ["+5", " 5", "5 ", "", "-", "1e3", "0x10"] {
            assert!(
                matches!(decode(json!({ "bigint": bad })), Err(MarkerError::InvalidBigInt(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_hex_is_an_error() {
        assert!(matches!(decode(json!({"hexbytes": "abc"})), Err(MarkerError::InvalidHex(_))));
        assert!(matches!(decode(json!({"hexbytes": "zz"})), Err(MarkerError::InvalidHex(_))));
    }

    #[test]
    fn test_non_string_payloads_are_errors() {
        assert_eq!(
            decode(json!({"hexbytes": 12})).unwrap_err(),
            MarkerError::NotAString { marker: BYTES_MARKER, got: "number" }
        );
        assert_eq!(
            decode(json!({"bigint": 12})).unwrap_err(),
            MarkerError::NotAString { marker: BIGINT_MARKER, got: "number" }
        );
    }

    #[test]
    fn test_nested_error_surfaces() {
        let err = decode(json!([1, {"a": [{"bigint": "1.5"}]}])).unwrap_err();
        assert_eq!(err, MarkerError::InvalidBigInt("1.5".to_string()));
    }

    #[test]
    fn test_encode_is_lowercase_and_canonical() {
        assert_eq!(encode(&Value::Bytes(vec![0xAB, 0x01])), json!({"hexbytes": "ab01"}));
        assert_eq!(encode(&Value::BigInt(BigInt::from(0))), json!({"bigint": "0"}));
        assert_eq!(encode(&Value::BigInt(BigInt::from(-42))), json!({"bigint": "-42"}));
    }

    #[test]
    fn test_deep_round_trip() {
        let big: BigInt = "340282366920938463463374607431768211457".parse().unwrap();
        let mut inner = BTreeMap::new();
        inner.insert("raw".to_string(), Value::Bytes(vec![0, 1, 2, 255]));
        inner.insert("amount".to_string(), Value::BigInt(big));
        inner.insert("negative".to_string(), Value::BigInt(BigInt::from(-7)));
        inner.insert("label".to_string(), Value::from("hexbytes"));
        inner.insert("flag".to_string(), Value::Bool(false));
        inner.insert("nothing".to_string(), Value::Null);

        let value = obj(vec![
            ("version", Value::from(2i64)),
            (
                "inputs",
                Value::Array(vec![
                    Value::Object(inner),
                    Value::Array(vec![Value::Bytes(vec![]), Value::Number(serde_json::Number::from_f64(1.5).unwrap())]),
                ]),
            ),
        ]);

        assert_eq!(decode(encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_transport_round_trip() {
        let wire = json!({
            "version": 2,
            "inputs": [{
                "outpointTransactionHash": {"hexbytes": "00".repeat(32)},
                "sequenceNumber": 4294967295u64,
                "unlockingBytecode": {"hexbytes": ""}
            }],
            "outputs": [{"valueSatoshis": {"bigint": "0"}, "lockingBytecode": {"hexbytes": "51"}}]
        });
        assert_eq!(encode(&decode(wire.clone()).unwrap()), wire);
    }

    #[test]
    fn test_reserved_single_key_object_becomes_marker() {
        let mut map = BTreeMap::new();
        map.insert(BYTES_MARKER.to_string(), Value::from("ff"));
        let object = Value::Object(map);

        assert_eq!(encode(&object), json!({"hexbytes": "ff"}));
        assert_eq!(decode(encode(&object)).unwrap(), Value::Bytes(vec![0xff]));
    }
}
