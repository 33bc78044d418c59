//! Key classification enums and byte wrappers for key material.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Asymmetric key algorithm of a stored key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "rsa_2048")]
    Rsa2048,
    #[serde(rename = "rsa_4096")]
    Rsa4096,
    #[serde(rename = "secp256k1")]
    Secp256k1,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Rsa2048 => "rsa_2048",
            Self::Rsa4096 => "rsa_4096",
            Self::Secp256k1 => "secp256k1",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stored key is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    Signing,
    Encryption,
    Authentication,
    Derivation,
    Backup,
    Recovery,
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Signing => "signing",
            Self::Encryption => "encryption",
            Self::Authentication => "authentication",
            Self::Derivation => "derivation",
            Self::Backup => "backup",
            Self::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a stored key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Inactive,
    Archived,
    Compromised,
    Expired,
    PendingDeletion,
}

impl KeyStatus {
    /// Only active keys may sign or be rotated.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
            Self::Compromised => "compromised",
            Self::Expired => "expired",
            Self::PendingDeletion => "pending_deletion",
        };
        f.write_str(s)
    }
}

/// Public key bytes in the algorithm's canonical encoding
/// (32 bytes for Ed25519, 33-byte SEC1 compressed for secp256k1,
/// 48-byte compressed G1 for BLS).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde(with = "crate::serde_hex")] pub Vec<u8>);

impl PublicKeyBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for PublicKeyBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

/// A detached signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(#[serde(with = "crate::serde_hex")] pub Vec<u8>);

impl SignatureBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SignatureBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

/// Raw private key bytes.
///
/// Intentionally does not implement `Debug`, `Serialize`, or `Clone`
/// to prevent accidental exposure. Bytes are zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_serializes_with_original_names() {
        let json = serde_json::to_string(&KeyType::Rsa4096).unwrap();
        assert_eq!(json, "\"rsa_4096\"");
        let parsed: KeyType = serde_json::from_str("\"secp256k1\"").unwrap();
        assert_eq!(parsed, KeyType::Secp256k1);
    }

    #[test]
    fn public_key_serializes_as_hex() {
        let pk = PublicKeyBytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: PublicKeyBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn usage_is_snake_case() {
        let json = serde_json::to_string(&KeyUsage::Authentication).unwrap();
        assert_eq!(json, "\"authentication\"");
    }
}
