use keyguard_types::KeyType;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(KeyType),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed")]
    Encryption,

    /// Authentication tag mismatch: wrong key or tampered data.
    #[error("decryption failed")]
    Decryption,

    #[error("malformed sealed blob: {0}")]
    Malformed(String),

    #[error("BLS error: {0}")]
    Bls(String),
}
