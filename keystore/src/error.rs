use keyguard_crypto::CryptoError;
use keyguard_types::{KeyStatus, KeyType};
use thiserror::Error;

use crate::vault::AccessLevel;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("no store found at {0}")]
    NotInitialized(String),

    #[error("a store already exists at {0}")]
    AlreadyInitialized(String),

    #[error("store is locked")]
    StoreLocked,

    #[error("wrong passphrase")]
    WrongPassphrase,

    #[error("too many failed unlock attempts, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key {key_id} is {status}")]
    KeyInactiveOrExpired { key_id: String, status: KeyStatus },

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(KeyType),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The store needs operator attention; no further operations are served.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("permission denied: {required:?} access required")]
    PermissionDenied { required: AccessLevel },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for KeystoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::UnsupportedKeyType(t) => Self::UnsupportedKeyType(t),
            other => Self::Crypto(other),
        }
    }
}
