//! Keypair generation for the supported key types.

use ed25519_dalek::SigningKey as Ed25519SigningKey;
use k256::ecdsa::SigningKey as Secp256k1SigningKey;
use keyguard_types::{KeyType, PublicKeyBytes, SecretBytes};
use rand::rngs::OsRng;

use crate::CryptoError;

/// Generate a fresh keypair from the OS RNG.
///
/// Ed25519 public keys are 32 bytes; secp256k1 public keys are 33-byte SEC1
/// compressed points. RSA types are recognized but not supported.
pub fn generate_keypair(key_type: KeyType) -> Result<(PublicKeyBytes, SecretBytes), CryptoError> {
    match key_type {
        KeyType::Ed25519 => {
            let signing_key = Ed25519SigningKey::generate(&mut OsRng);
            let public = signing_key.verifying_key().to_bytes().to_vec();
            Ok((
                PublicKeyBytes(public),
                SecretBytes::new(signing_key.to_bytes().to_vec()),
            ))
        }
        KeyType::Secp256k1 => {
            let signing_key = Secp256k1SigningKey::random(&mut OsRng);
            let public = signing_key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec();
            Ok((
                PublicKeyBytes(public),
                SecretBytes::new(signing_key.to_bytes().to_vec()),
            ))
        }
        KeyType::Rsa2048 | KeyType::Rsa4096 => Err(CryptoError::UnsupportedKeyType(key_type)),
    }
}

/// Recompute the public key for imported secret bytes, validating them.
pub fn public_from_secret(key_type: KeyType, secret: &[u8]) -> Result<PublicKeyBytes, CryptoError> {
    match key_type {
        KeyType::Ed25519 => {
            let bytes: &[u8; 32] = secret.try_into().map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "Ed25519 secret must be 32 bytes, got {}",
                    secret.len()
                ))
            })?;
            let signing_key = Ed25519SigningKey::from_bytes(bytes);
            Ok(PublicKeyBytes(
                signing_key.verifying_key().to_bytes().to_vec(),
            ))
        }
        KeyType::Secp256k1 => {
            let signing_key = Secp256k1SigningKey::from_slice(secret)
                .map_err(|e| CryptoError::InvalidKey(format!("secp256k1 secret: {e}")))?;
            Ok(PublicKeyBytes(
                signing_key
                    .verifying_key()
                    .to_encoded_point(true)
                    .as_bytes()
                    .to_vec(),
            ))
        }
        KeyType::Rsa2048 | KeyType::Rsa4096 => Err(CryptoError::UnsupportedKeyType(key_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sizes() {
        let (public, secret) = generate_keypair(KeyType::Ed25519).unwrap();
        assert_eq!(public.as_bytes().len(), 32);
        assert_eq!(secret.len(), 32);
    }

    #[test]
    fn secp256k1_public_is_compressed() {
        let (public, secret) = generate_keypair(KeyType::Secp256k1).unwrap();
        assert_eq!(public.as_bytes().len(), 33);
        assert!(matches!(public.as_bytes()[0], 0x02 | 0x03));
        assert_eq!(secret.len(), 32);
    }

    #[test]
    fn rsa_is_unsupported() {
        assert!(matches!(
            generate_keypair(KeyType::Rsa2048),
            Err(CryptoError::UnsupportedKeyType(KeyType::Rsa2048))
        ));
        assert!(matches!(
            public_from_secret(KeyType::Rsa4096, &[0u8; 32]),
            Err(CryptoError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn public_from_secret_matches_generation() {
        for key_type in [KeyType::Ed25519, KeyType::Secp256k1] {
            let (public, secret) = generate_keypair(key_type).unwrap();
            let derived = public_from_secret(key_type, secret.as_bytes()).unwrap();
            assert_eq!(derived, public);
        }
    }

    #[test]
    fn ed25519_import_rejects_wrong_length() {
        assert!(matches!(
            public_from_secret(KeyType::Ed25519, &[1u8; 31]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn secp256k1_import_rejects_zero_scalar() {
        assert!(public_from_secret(KeyType::Secp256k1, &[0u8; 32]).is_err());
    }
}
