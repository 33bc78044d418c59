//! Signing and verification for Ed25519 and secp256k1.
//!
//! secp256k1 signatures are ECDSA over SHA-256 of the message, encoded as
//! 64-byte compact `r ‖ s`.

use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::signature::{Signer as _, Verifier as _};
use keyguard_types::{KeyType, SignatureBytes};

use crate::CryptoError;

/// Sign `data` with `secret`.
pub fn sign(key_type: KeyType, secret: &[u8], data: &[u8]) -> Result<SignatureBytes, CryptoError> {
    match key_type {
        KeyType::Ed25519 => {
            let bytes: &[u8; 32] = secret
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("Ed25519 secret must be 32 bytes".into()))?;
            let signing_key = ed25519_dalek::SigningKey::from_bytes(bytes);
            let sig = signing_key.sign(data);
            Ok(SignatureBytes(sig.to_bytes().to_vec()))
        }
        KeyType::Secp256k1 => {
            let signing_key = k256::ecdsa::SigningKey::from_slice(secret)
                .map_err(|e| CryptoError::InvalidKey(format!("secp256k1 secret: {e}")))?;
            let sig: k256::ecdsa::Signature = signing_key.sign(data);
            Ok(SignatureBytes(sig.to_bytes().to_vec()))
        }
        KeyType::Rsa2048 | KeyType::Rsa4096 => Err(CryptoError::UnsupportedKeyType(key_type)),
    }
}

/// Verify `signature` over `data` against `public`.
///
/// Malformed keys or signatures verify as `false`; only unsupported key types
/// are an error.
pub fn verify(
    key_type: KeyType,
    public: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    match key_type {
        KeyType::Ed25519 => {
            let Ok(public) = <&[u8; 32]>::try_from(public) else {
                return Ok(false);
            };
            let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(public) else {
                return Ok(false);
            };
            let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                return Ok(false);
            };
            Ok(verifying_key.verify(data, &sig).is_ok())
        }
        KeyType::Secp256k1 => {
            let Ok(verifying_key) = k256::ecdsa::VerifyingKey::from_sec1_bytes(public) else {
                return Ok(false);
            };
            let Ok(sig) = k256::ecdsa::Signature::from_slice(signature) else {
                return Ok(false);
            };
            Ok(verifying_key.verify(data, &sig).is_ok())
        }
        KeyType::Rsa2048 | KeyType::Rsa4096 => Err(CryptoError::UnsupportedKeyType(key_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_keypair;

    #[test]
    fn sign_and_verify_both_types() {
        for key_type in [KeyType::Ed25519, KeyType::Secp256k1] {
            let (public, secret) = generate_keypair(key_type).unwrap();
            let sig = sign(key_type, secret.as_bytes(), b"hello").unwrap();
            assert_eq!(sig.as_bytes().len(), 64);
            assert!(verify(key_type, public.as_bytes(), b"hello", sig.as_bytes()).unwrap());
        }
    }

    #[test]
    fn wrong_message_fails() {
        for key_type in [KeyType::Ed25519, KeyType::Secp256k1] {
            let (public, secret) = generate_keypair(key_type).unwrap();
            let sig = sign(key_type, secret.as_bytes(), b"correct").unwrap();
            assert!(!verify(key_type, public.as_bytes(), b"wrong", sig.as_bytes()).unwrap());
        }
    }

    #[test]
    fn wrong_key_fails() {
        let (_, secret) = generate_keypair(KeyType::Ed25519).unwrap();
        let (other, _) = generate_keypair(KeyType::Ed25519).unwrap();
        let sig = sign(KeyType::Ed25519, secret.as_bytes(), b"msg").unwrap();
        assert!(!verify(KeyType::Ed25519, other.as_bytes(), b"msg", sig.as_bytes()).unwrap());
    }

    #[test]
    fn ed25519_is_deterministic() {
        let (_, secret) = generate_keypair(KeyType::Ed25519).unwrap();
        let a = sign(KeyType::Ed25519, secret.as_bytes(), b"same").unwrap();
        let b = sign(KeyType::Ed25519, secret.as_bytes(), b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_inputs_verify_false() {
        assert!(!verify(KeyType::Ed25519, &[0xFF; 31], b"m", &[0u8; 64]).unwrap());
        assert!(!verify(KeyType::Secp256k1, &[0x02; 33], b"m", &[0u8; 10]).unwrap());
    }

    #[test]
    fn rsa_sign_is_unsupported() {
        assert!(matches!(
            sign(KeyType::Rsa2048, &[0u8; 32], b"m"),
            Err(CryptoError::UnsupportedKeyType(_))
        ));
    }
}
