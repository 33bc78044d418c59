use keyguard_crypto::CryptoError;
use thiserror::Error;

use crate::TransactionStatus;

#[derive(Debug, Error)]
pub enum MultisigError {
    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("wallet would have {count} signers, allowed range is {min}..={max}")]
    SignerCount { count: usize, min: usize, max: usize },

    #[error("active signers ({active}) would fall below threshold {threshold}")]
    ThresholdNotMet { threshold: u32, active: u32 },

    #[error("signer {0} is already a member")]
    DuplicateSigner(String),

    #[error("signer {0} is not an active member of the wallet")]
    UnknownSigner(String),

    #[error("signer {0} has already signed")]
    DuplicateSignature(String),

    #[error("signature from {0} does not verify")]
    InvalidSignature(String),

    #[error("signer {0} supplied no valid proof of possession")]
    InvalidProofOfPossession(String),

    #[error("transaction {tx_id} is {status}")]
    NotSigning { tx_id: String, status: TransactionStatus },

    #[error("invalid signer key: {0}")]
    InvalidSignerKey(String),

    #[error("authorization does not verify: {0}")]
    InvalidAuthorization(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
