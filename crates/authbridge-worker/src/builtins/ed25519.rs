//! Ed25519 key derivation, signing and verification.

use authbridge_protocol::Value;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use super::{array_arg, bytes_arg};
use crate::capability::{InvocationError, Member, Namespace};

pub(super) fn namespace() -> Namespace {
    Namespace::new()
        .with("generatePrivateKey", Member::function(generate_private_key))
        .with("derivePublicKey", Member::function(derive_public_key))
        .with("sign", Member::function(sign))
        .with("verify", Member::function(verify))
        .with(
            "PUBLIC_KEY_LENGTH",
            Member::Constant(Value::from(ed25519_dalek::PUBLIC_KEY_LENGTH as u64)),
        )
}

/// `ed25519.generatePrivateKey() -> bytes(32)`
fn generate_private_key(_args: Vec<Value>) -> Result<Value, InvocationError> {
    let key = SigningKey::generate(&mut OsRng);
    Ok(Value::Bytes(key.to_bytes().to_vec()))
}

/// `ed25519.derivePublicKey(privateKey: bytes(32)) -> bytes(32)`
fn derive_public_key(args: Vec<Value>) -> Result<Value, InvocationError> {
    let secret = array_arg::<32>(&args, 0, "privateKey")?;
    let key = SigningKey::from_bytes(&secret);
    Ok(Value::Bytes(key.verifying_key().to_bytes().to_vec()))
}

/// `ed25519.sign(privateKey: bytes(32), message: bytes) -> bytes(64)`
fn sign(args: Vec<Value>) -> Result<Value, InvocationError> {
    let secret = array_arg::<32>(&args, 0, "privateKey")?;
    let message = bytes_arg(&args, 1, "message")?;
    let signature = SigningKey::from_bytes(&secret).sign(message);
    Ok(Value::Bytes(signature.to_bytes().to_vec()))
}

/// `ed25519.verify(publicKey: bytes(32), message: bytes, signature: bytes(64)) -> bool`
///
/// A malformed public key is an error; a well-formed key with a signature
/// that does not verify is `false`.
fn verify(args: Vec<Value>) -> Result<Value, InvocationError> {
    let public = array_arg::<32>(&args, 0, "publicKey")?;
    let message = bytes_arg(&args, 1, "message")?;
    let signature = array_arg::<64>(&args, 2, "signature")?;

    let key = VerifyingKey::from_bytes(&public)
        .map_err(|e| InvocationError::new(format!("invalid public key: {}", e)))?;
    let signature = Signature::from_bytes(&signature);
    Ok(Value::Bool(key.verify(message, &signature).is_ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 8032, section 7.1, TEST 1
    const SECRET: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const PUBLIC: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";
    const SIGNATURE: &str = "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b";

    fn bytes(hex_str: &str) -> Value {
        Value::Bytes(hex::decode(hex_str).unwrap())
    }

    #[test]
    fn test_derive_public_key_rfc8032() {
        let out = derive_public_key(vec![bytes(SECRET)]).unwrap();
        assert_eq!(out, bytes(PUBLIC));
    }

    #[test]
    fn test_sign_rfc8032() {
        let out = sign(vec![bytes(SECRET), Value::Bytes(vec![])]).unwrap();
        assert_eq!(out, bytes(SIGNATURE));
    }

    #[test]
    fn test_verify() {
        let ok = verify(vec![bytes(PUBLIC), Value::Bytes(vec![]), bytes(SIGNATURE)]).unwrap();
        assert_eq!(ok, Value::Bool(true));

        let tampered = verify(vec![bytes(PUBLIC), Value::Bytes(vec![1]), bytes(SIGNATURE)]).unwrap();
        assert_eq!(tampered, Value::Bool(false));
    }

    #[test]
    fn test_generated_key_signs_and_verifies() {
        let secret = generate_private_key(vec![]).unwrap();
        let public = derive_public_key(vec![secret.clone()]).unwrap();
        let message = Value::Bytes(b"authbridge".to_vec());
        let signature = sign(vec![secret, message.clone()]).unwrap();
        assert_eq!(verify(vec![public, message, signature]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_short_key_is_rejected() {
        let err = derive_public_key(vec![Value::Bytes(vec![0x11; 16])]).unwrap_err();
        assert_eq!(err.message, "argument 0 (privateKey) must be 32 bytes, got 16");
    }
}
