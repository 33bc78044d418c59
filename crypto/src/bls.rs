//! BLS12-381 signatures in the `min_pk` setting (48-byte public keys in G1,
//! 96-byte signatures in G2), used to aggregate multisig approvals into a
//! single signature.
//!
//! Fast aggregate verification is only sound against rogue-key attacks when
//! every public key comes with a proof of possession, so signer registration
//! must check [`bls_verify_possession`].

use blst::min_pk::{AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use keyguard_types::{PublicKeyBytes, SecretBytes, SignatureBytes};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::CryptoError;

pub const BLS_PUBLIC_KEY_LEN: usize = 48;
pub const BLS_SIGNATURE_LEN: usize = 96;

/// Ciphersuite for message signatures (proof-of-possession scheme).
const SIG_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";
/// Ciphersuite for proofs of possession.
const POP_DST: &[u8] = b"BLS_POP_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

pub fn bls_generate_keypair() -> Result<(PublicKeyBytes, SecretBytes), CryptoError> {
    let mut ikm = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(ikm.as_mut());
    let sk = SecretKey::key_gen(ikm.as_ref(), &[])
        .map_err(|e| CryptoError::Bls(format!("key generation: {e:?}")))?;
    let pk = sk.sk_to_pk();
    Ok((
        PublicKeyBytes(pk.to_bytes().to_vec()),
        SecretBytes::new(sk.to_bytes().to_vec()),
    ))
}

fn secret_key(secret: &[u8]) -> Result<SecretKey, CryptoError> {
    SecretKey::from_bytes(secret).map_err(|e| CryptoError::InvalidKey(format!("BLS secret: {e:?}")))
}

fn public_key(public: &[u8]) -> Result<PublicKey, CryptoError> {
    // key_validate also rejects the identity point.
    PublicKey::key_validate(public)
        .map_err(|e| CryptoError::InvalidKey(format!("BLS public key: {e:?}")))
}

pub fn bls_sign(secret: &[u8], message: &[u8]) -> Result<SignatureBytes, CryptoError> {
    let sk = secret_key(secret)?;
    Ok(SignatureBytes(sk.sign(message, SIG_DST, &[]).to_bytes().to_vec()))
}

pub fn bls_verify(public: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let (Ok(pk), Ok(sig)) = (public_key(public), Signature::from_bytes(signature)) else {
        return false;
    };
    sig.verify(true, message, SIG_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// Proof that the holder of `secret` controls the matching public key.
pub fn bls_prove_possession(secret: &[u8]) -> Result<SignatureBytes, CryptoError> {
    let sk = secret_key(secret)?;
    let pk_bytes = sk.sk_to_pk().to_bytes();
    Ok(SignatureBytes(sk.sign(&pk_bytes, POP_DST, &[]).to_bytes().to_vec()))
}

pub fn bls_verify_possession(public: &[u8], proof: &[u8]) -> bool {
    let (Ok(pk), Ok(sig)) = (public_key(public), Signature::from_bytes(proof)) else {
        return false;
    };
    sig.verify(true, public, POP_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// Aggregate individual signatures (all over the same message) into one.
pub fn bls_aggregate(signatures: &[&[u8]]) -> Result<SignatureBytes, CryptoError> {
    if signatures.is_empty() {
        return Err(CryptoError::Bls("nothing to aggregate".into()));
    }
    let parsed = signatures
        .iter()
        .map(|s| Signature::from_bytes(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CryptoError::Bls(format!("signature decode: {e:?}")))?;
    let refs: Vec<&Signature> = parsed.iter().collect();
    let aggregate = AggregateSignature::aggregate(&refs, true)
        .map_err(|e| CryptoError::Bls(format!("aggregate: {e:?}")))?;
    Ok(SignatureBytes(aggregate.to_signature().to_bytes().to_vec()))
}

/// Verify an aggregate signature over one message against the set of
/// participating public keys.
pub fn bls_fast_aggregate_verify(message: &[u8], aggregate: &[u8], publics: &[&[u8]]) -> bool {
    if publics.is_empty() {
        return false;
    }
    let Ok(sig) = Signature::from_bytes(aggregate) else {
        return false;
    };
    let Ok(keys) = publics
        .iter()
        .map(|p| public_key(p))
        .collect::<Result<Vec<_>, _>>()
    else {
        return false;
    };
    let refs: Vec<&PublicKey> = keys.iter().collect();
    sig.fast_aggregate_verify(true, message, SIG_DST, &refs) == BLST_ERROR::BLST_SUCCESS
}
