//! Final authorizations built from a completed signature collection.
//!
//! Signatures are never concatenated into an opaque blob. A multi-key
//! authorization keeps each signer's signature next to its public key so a
//! verifier (or chain) can check every one; a BLS authorization carries a
//! single aggregate signature over the payload plus the participating keys.

use std::collections::BTreeSet;

use keyguard_crypto::{blake2b_256, bls_aggregate, bls_fast_aggregate_verify};
use keyguard_types::{PublicKeyBytes, SignatureBytes};
use serde::{Deserialize, Serialize};

use crate::{
    AuthorizationScheme, MultisigError, MultisigTransaction, MultisigWallet, SignerKeyKind,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedSignature {
    pub signer_id: String,
    pub key_kind: SignerKeyKind,
    pub public_key: PublicKeyBytes,
    pub signature: SignatureBytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiKeyAuthorization {
    pub wallet_id: String,
    pub tx_id: String,
    pub threshold: u32,
    /// Hex Blake2b-256 of the payload.
    pub payload_digest: String,
    /// Sorted by signer id.
    pub signatures: Vec<AuthorizedSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsAuthorization {
    pub wallet_id: String,
    pub tx_id: String,
    pub threshold: u32,
    pub payload_digest: String,
    /// Sorted by signer id, parallel to `public_keys`.
    pub signers: Vec<String>,
    pub public_keys: Vec<PublicKeyBytes>,
    pub signature: SignatureBytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Authorization {
    MultiKey(MultiKeyAuthorization),
    Bls(BlsAuthorization),
}

fn digest_hex(payload: &[u8]) -> String {
    hex::encode(blake2b_256(payload))
}

impl Authorization {
    /// Build the final authorization from the counted signatures of `tx`.
    pub(crate) fn combine(
        wallet: &MultisigWallet,
        tx: &MultisigTransaction,
    ) -> Result<Self, MultisigError> {
        let counted: Vec<_> = tx.counted().collect();
        if (counted.len() as u32) < tx.required_signatures {
            return Err(MultisigError::InvalidAuthorization(format!(
                "{} of {} signatures collected",
                counted.len(),
                tx.required_signatures
            )));
        }
        let payload_digest = digest_hex(&tx.payload);

        let authorization = match wallet.scheme {
            AuthorizationScheme::MultiKey => {
                let signatures = counted
                    .iter()
                    .map(|s| {
                        let signer = wallet
                            .signers
                            .get(&s.signer_id)
                            .ok_or_else(|| MultisigError::UnknownSigner(s.signer_id.clone()))?;
                        Ok(AuthorizedSignature {
                            signer_id: s.signer_id.clone(),
                            key_kind: signer.key_kind,
                            public_key: s.public_key.clone(),
                            signature: s.signature.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, MultisigError>>()?;
                Authorization::MultiKey(MultiKeyAuthorization {
                    wallet_id: wallet.wallet_id.clone(),
                    tx_id: tx.tx_id.clone(),
                    threshold: tx.required_signatures,
                    payload_digest,
                    signatures,
                })
            }
            AuthorizationScheme::Bls => {
                let parts: Vec<&[u8]> = counted.iter().map(|s| s.signature.as_bytes()).collect();
                let signature = bls_aggregate(&parts)?;
                Authorization::Bls(BlsAuthorization {
                    wallet_id: wallet.wallet_id.clone(),
                    tx_id: tx.tx_id.clone(),
                    threshold: tx.required_signatures,
                    payload_digest,
                    signers: counted.iter().map(|s| s.signer_id.clone()).collect(),
                    public_keys: counted.iter().map(|s| s.public_key.clone()).collect(),
                    signature,
                })
            }
        };
        authorization.verify(&tx.payload)?;
        Ok(authorization)
    }

    pub fn scheme(&self) -> AuthorizationScheme {
        match self {
            Self::MultiKey(_) => AuthorizationScheme::MultiKey,
            Self::Bls(_) => AuthorizationScheme::Bls,
        }
    }

    pub fn participants(&self) -> Vec<&str> {
        match self {
            Self::MultiKey(a) => a.signatures.iter().map(|s| s.signer_id.as_str()).collect(),
            Self::Bls(a) => a.signers.iter().map(String::as_str).collect(),
        }
    }

    /// Re-check the authorization against `payload`: the digest, the number
    /// of distinct participants and every signature (or the aggregate).
    ///
    /// BLS keys are assumed to have passed a proof-of-possession check when
    /// their signer joined the wallet.
    pub fn verify(&self, payload: &[u8]) -> Result<(), MultisigError> {
        let (threshold, digest, participants) = match self {
            Self::MultiKey(a) => (a.threshold, &a.payload_digest, self.participants()),
            Self::Bls(a) => (a.threshold, &a.payload_digest, self.participants()),
        };
        if *digest != digest_hex(payload) {
            return Err(MultisigError::InvalidAuthorization("payload digest mismatch".into()));
        }
        let distinct: BTreeSet<&str> = participants.iter().copied().collect();
        if distinct.len() != participants.len() {
            return Err(MultisigError::InvalidAuthorization("repeated participant".into()));
        }
        if (distinct.len() as u32) < threshold {
            return Err(MultisigError::InvalidAuthorization(format!(
                "{} participants, threshold {threshold}",
                distinct.len()
            )));
        }

        match self {
            Self::MultiKey(a) => {
                for s in &a.signatures {
                    if !s
                        .key_kind
                        .verify(s.public_key.as_bytes(), payload, s.signature.as_bytes())
                    {
                        return Err(MultisigError::InvalidSignature(s.signer_id.clone()));
                    }
                }
            }
            Self::Bls(a) => {
                if a.public_keys.len() != a.signers.len() {
                    return Err(MultisigError::InvalidAuthorization(
                        "signer and key lists differ in length".into(),
                    ));
                }
                let keys: Vec<&[u8]> = a.public_keys.iter().map(|k| k.as_bytes()).collect();
                if !bls_fast_aggregate_verify(payload, a.signature.as_bytes(), &keys) {
                    return Err(MultisigError::InvalidAuthorization(
                        "aggregate signature does not verify".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
