//! Multisig wallets and their signers.

use std::collections::BTreeMap;
use std::fmt;

use keyguard_crypto::{bls_verify_possession, verify, BLS_PUBLIC_KEY_LEN};
use keyguard_types::{KeyType, PublicKeyBytes, SignatureBytes, Timestamp};
use serde::{Deserialize, Serialize};

use crate::MultisigError;

/// How collected signatures become the final authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationScheme {
    /// Every participating signature is kept, as an on-chain multi-key
    /// account would check them.
    MultiKey,
    /// BLS12-381 signatures aggregated into one.
    Bls,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerKeyKind {
    Ed25519,
    Secp256k1,
    Bls,
}

impl SignerKeyKind {
    fn key_type(self) -> Option<KeyType> {
        match self {
            Self::Ed25519 => Some(KeyType::Ed25519),
            Self::Secp256k1 => Some(KeyType::Secp256k1),
            Self::Bls => None,
        }
    }

    /// Check one signature over `payload`. Malformed input is `false`.
    pub fn verify(self, public: &[u8], payload: &[u8], signature: &[u8]) -> bool {
        match self.key_type() {
            Some(key_type) => verify(key_type, public, payload, signature).unwrap_or(false),
            None => keyguard_crypto::bls_verify(public, payload, signature),
        }
    }
}

impl fmt::Display for SignerKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ed25519 => "ed25519",
            Self::Secp256k1 => "secp256k1",
            Self::Bls => "bls",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Creator,
    #[default]
    Signer,
    Backup,
    Admin,
}

/// A signer as supplied by the caller when creating or extending a wallet.
#[derive(Clone, Debug)]
pub struct SignerSpec {
    pub signer_id: String,
    pub key_kind: SignerKeyKind,
    pub public_key: PublicKeyBytes,
    pub address: String,
    pub role: SignerRole,
    pub weight: u32,
    /// Required for BLS signers.
    pub proof_of_possession: Option<SignatureBytes>,
}

impl SignerSpec {
    pub fn new(
        signer_id: impl Into<String>,
        key_kind: SignerKeyKind,
        public_key: PublicKeyBytes,
    ) -> Self {
        Self {
            signer_id: signer_id.into(),
            key_kind,
            public_key,
            address: String::new(),
            role: SignerRole::Signer,
            weight: 1,
            proof_of_possession: None,
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn role(mut self, role: SignerRole) -> Self {
        self.role = role;
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn proof_of_possession(mut self, proof: SignatureBytes) -> Self {
        self.proof_of_possession = Some(proof);
        self
    }

    /// Reject keys the wallet's scheme cannot use.
    pub(crate) fn validate(&self, scheme: AuthorizationScheme) -> Result<(), MultisigError> {
        if self.signer_id.is_empty() {
            return Err(MultisigError::InvalidSignerKey("empty signer id".into()));
        }
        if self.weight == 0 {
            return Err(MultisigError::InvalidSignerKey(format!(
                "{}: weight must be positive",
                self.signer_id
            )));
        }
        let expected_len = match self.key_kind {
            SignerKeyKind::Ed25519 => 32,
            SignerKeyKind::Secp256k1 => 33,
            SignerKeyKind::Bls => BLS_PUBLIC_KEY_LEN,
        };
        if self.public_key.as_bytes().len() != expected_len {
            return Err(MultisigError::InvalidSignerKey(format!(
                "{}: {} public key must be {expected_len} bytes",
                self.signer_id, self.key_kind
            )));
        }
        match (scheme, self.key_kind) {
            (AuthorizationScheme::Bls, SignerKeyKind::Bls) => {
                let proven = self
                    .proof_of_possession
                    .as_ref()
                    .is_some_and(|p| bls_verify_possession(self.public_key.as_bytes(), p.as_bytes()));
                if !proven {
                    return Err(MultisigError::InvalidProofOfPossession(self.signer_id.clone()));
                }
                Ok(())
            }
            (AuthorizationScheme::MultiKey, SignerKeyKind::Ed25519 | SignerKeyKind::Secp256k1) => {
                Ok(())
            }
            _ => Err(MultisigError::InvalidSignerKey(format!(
                "{}: {} keys cannot join a {scheme:?} wallet",
                self.signer_id, self.key_kind
            ))),
        }
    }

    pub(crate) fn into_signer(self, now: Timestamp) -> Signer {
        Signer {
            signer_id: self.signer_id,
            key_kind: self.key_kind,
            public_key: self.public_key,
            address: self.address,
            role: self.role,
            weight: self.weight,
            active: true,
            added_at: now,
            last_signed: None,
            signature_count: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub signer_id: String,
    pub key_kind: SignerKeyKind,
    pub public_key: PublicKeyBytes,
    pub address: String,
    pub role: SignerRole,
    pub weight: u32,
    pub active: bool,
    pub added_at: Timestamp,
    pub last_signed: Option<Timestamp>,
    pub signature_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultisigWallet {
    pub wallet_id: String,
    pub name: String,
    pub description: String,
    pub scheme: AuthorizationScheme,
    /// Distinct signer signatures needed to complete a transaction.
    pub threshold: u32,
    pub signers: BTreeMap<String, Signer>,
    pub created_by: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MultisigWallet {
    pub fn active_signers(&self) -> impl Iterator<Item = &Signer> {
        self.signers.values().filter(|s| s.active)
    }

    pub fn active_count(&self) -> u32 {
        self.active_signers().count() as u32
    }

    pub fn active_weight(&self) -> u32 {
        self.active_signers().map(|s| s.weight).sum()
    }

    pub fn active_signer(&self, signer_id: &str) -> Option<&Signer> {
        self.signers.get(signer_id).filter(|s| s.active)
    }

    /// Active signers, and their combined weight, must both cover the
    /// threshold.
    pub(crate) fn check_threshold(&self) -> Result<(), MultisigError> {
        let active = self.active_count().min(self.active_weight());
        if active < self.threshold {
            return Err(MultisigError::ThresholdNotMet {
                threshold: self.threshold,
                active,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyguard_crypto::{bls_generate_keypair, bls_prove_possession, generate_keypair};

    fn ed25519_spec(id: &str) -> SignerSpec {
        let (public, _) = generate_keypair(KeyType::Ed25519).unwrap();
        SignerSpec::new(id, SignerKeyKind::Ed25519, public)
    }

    #[test]
    fn scheme_and_key_kind_must_agree() {
        let spec = ed25519_spec("s1");
        spec.validate(AuthorizationScheme::MultiKey).unwrap();
        assert!(matches!(
            spec.validate(AuthorizationScheme::Bls),
            Err(MultisigError::InvalidSignerKey(_))
        ));
    }

    #[test]
    fn bls_signer_needs_proof_of_possession() {
        let (public, secret) = bls_generate_keypair().unwrap();
        let bare = SignerSpec::new("b1", SignerKeyKind::Bls, public.clone());
        assert!(matches!(
            bare.validate(AuthorizationScheme::Bls),
            Err(MultisigError::InvalidProofOfPossession(_))
        ));

        let (_, other_secret) = bls_generate_keypair().unwrap();
        let stolen = bare
            .clone()
            .proof_of_possession(bls_prove_possession(other_secret.as_bytes()).unwrap());
        assert!(stolen.validate(AuthorizationScheme::Bls).is_err());

        let proven = bare.proof_of_possession(bls_prove_possession(secret.as_bytes()).unwrap());
        proven.validate(AuthorizationScheme::Bls).unwrap();
    }

    #[test]
    fn zero_weight_and_bad_lengths_rejected() {
        assert!(ed25519_spec("s").weight(0).validate(AuthorizationScheme::MultiKey).is_err());
        let short = SignerSpec::new("s", SignerKeyKind::Ed25519, PublicKeyBytes(vec![1; 31]));
        assert!(short.validate(AuthorizationScheme::MultiKey).is_err());
    }

    #[test]
    fn threshold_counts_active_signers_only() {
        let now = Timestamp::new(1);
        let mut signers = BTreeMap::new();
        for id in ["a", "b", "c"] {
            signers.insert(id.to_string(), ed25519_spec(id).weight(5).into_signer(now));
        }
        let mut wallet = MultisigWallet {
            wallet_id: "w".into(),
            name: "w".into(),
            description: String::new(),
            scheme: AuthorizationScheme::MultiKey,
            threshold: 2,
            signers,
            created_by: "ops".into(),
            created_at: now,
            updated_at: now,
        };
        wallet.check_threshold().unwrap();
        assert_eq!(wallet.active_weight(), 15);

        if let Some(s) = wallet.signers.get_mut("a") {
            s.active = false;
        }
        if let Some(s) = wallet.signers.get_mut("b") {
            s.active = false;
        }
        // Heavy weight does not stand in for a missing signer.
        assert!(matches!(
            wallet.check_threshold(),
            Err(MultisigError::ThresholdNotMet { threshold: 2, active: 1 })
        ));
        assert!(wallet.active_signer("a").is_none());
        assert!(wallet.active_signer("c").is_some());
    }
}
