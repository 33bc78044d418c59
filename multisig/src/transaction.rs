//! Transactions awaiting signatures.

use std::collections::BTreeMap;
use std::fmt;

use keyguard_types::{PublicKeyBytes, SignatureBytes, Timestamp};
use serde::{Deserialize, Serialize};

use crate::Authorization;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Transfer,
    ContractCall,
    KeyRotation,
    WalletUpdate,
    Emergency,
}

/// `Signing -> Completed | Failed | Cancelled | Expired`. Every state but
/// `Signing` is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Signing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl TransactionStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Signing)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Signing => "signing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        })
    }
}

/// A verified signature from one signer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedSignature {
    pub signer_id: String,
    pub public_key: PublicKeyBytes,
    pub signature: SignatureBytes,
    pub verified_at: Timestamp,
    /// Arrived after the transaction completed; kept for the record but not
    /// part of the authorization.
    pub late: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultisigTransaction {
    pub tx_id: String,
    pub wallet_id: String,
    pub tx_type: TransactionType,
    #[serde(with = "keyguard_types::serde_hex")]
    pub payload: Vec<u8>,
    pub description: String,
    pub initiator: String,
    pub status: TransactionStatus,
    pub required_signatures: u32,
    pub signatures: BTreeMap<String, CollectedSignature>,
    pub authorization: Option<Authorization>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
}

impl MultisigTransaction {
    /// Signatures that count toward the threshold.
    pub fn counted(&self) -> impl Iterator<Item = &CollectedSignature> {
        self.signatures.values().filter(|s| !s.late)
    }

    pub fn collected(&self) -> u32 {
        self.counted().count() as u32
    }

    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.status == TransactionStatus::Signing && now >= self.expires_at
    }

    pub(crate) fn finish(&mut self, status: TransactionStatus, now: Timestamp, error: Option<String>) {
        self.status = status;
        self.completed_at = Some(now);
        self.error = error;
    }
}

/// Snapshot returned by status queries.
#[derive(Clone, Debug, Serialize)]
pub struct TransactionInfo {
    pub tx_id: String,
    pub wallet_id: String,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub required_signatures: u32,
    pub collected_signatures: u32,
    pub signers: Vec<String>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    pub has_authorization: bool,
}

impl From<&MultisigTransaction> for TransactionInfo {
    fn from(tx: &MultisigTransaction) -> Self {
        Self {
            tx_id: tx.tx_id.clone(),
            wallet_id: tx.wallet_id.clone(),
            tx_type: tx.tx_type,
            status: tx.status,
            required_signatures: tx.required_signatures,
            collected_signatures: tx.collected(),
            signers: tx.counted().map(|s| s.signer_id.clone()).collect(),
            created_at: tx.created_at,
            expires_at: tx.expires_at,
            completed_at: tx.completed_at,
            error: tx.error.clone(),
            has_authorization: tx.authorization.is_some(),
        }
    }
}
