//! Authenticated encryption of secret material.
//!
//! Sealed blobs are laid out as `nonce (12) ‖ tag (16) ‖ ciphertext`. A fresh
//! random nonce is drawn for every seal.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::CryptoError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Bytes a sealed blob carries on top of its plaintext.
pub const SEALED_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cipher {
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// Encrypt `plaintext` under `key`.
pub fn seal(cipher: Cipher, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    // Both backends emit `ciphertext ‖ tag`.
    let ct_and_tag = match cipher {
        Cipher::Aes256Gcm => {
            let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Encryption)?;
            aead.encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
        }
        Cipher::ChaCha20Poly1305 => {
            let aead =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Encryption)?;
            aead.encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
        }
    }
    .map_err(|_| CryptoError::Encryption)?;

    let (ciphertext, tag) = ct_and_tag.split_at(ct_and_tag.len() - TAG_LEN);
    let mut out = Vec::with_capacity(SEALED_OVERHEAD + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`seal`]. Any tampering, or the wrong key,
/// yields [`CryptoError::Decryption`].
pub fn open(
    cipher: Cipher,
    key: &[u8; 32],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(CryptoError::Malformed(format!(
            "expected at least {SEALED_OVERHEAD} bytes, got {}",
            sealed.len()
        )));
    }
    let (nonce, rest) = sealed.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut ct_and_tag = Vec::with_capacity(rest.len());
    ct_and_tag.extend_from_slice(ciphertext);
    ct_and_tag.extend_from_slice(tag);

    let plaintext = match cipher {
        Cipher::Aes256Gcm => {
            let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Decryption)?;
            aead.decrypt(aes_gcm::Nonce::from_slice(nonce), ct_and_tag.as_ref())
        }
        Cipher::ChaCha20Poly1305 => {
            let aead =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::Decryption)?;
            aead.decrypt(chacha20poly1305::Nonce::from_slice(nonce), ct_and_tag.as_ref())
        }
    }
    .map_err(|_| CryptoError::Decryption)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn layout_is_nonce_tag_ciphertext() {
        let sealed = seal(Cipher::Aes256Gcm, &KEY, b"secret").unwrap();
        assert_eq!(sealed.len(), SEALED_OVERHEAD + 6);
        let opened = open(Cipher::Aes256Gcm, &KEY, &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"secret");
    }

    #[test]
    fn nonces_are_fresh() {
        let a = seal(Cipher::ChaCha20Poly1305, &KEY, b"same").unwrap();
        let b = seal(Cipher::ChaCha20Poly1305, &KEY, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(Cipher::ChaCha20Poly1305, &KEY, b"secret").unwrap();
        let result = open(Cipher::ChaCha20Poly1305, &[0x43; 32], &sealed);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn tampered_tag_fails() {
        let mut sealed = seal(Cipher::Aes256Gcm, &KEY, b"secret").unwrap();
        sealed[NONCE_LEN] ^= 0x01;
        assert!(matches!(
            open(Cipher::Aes256Gcm, &KEY, &sealed),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut sealed = seal(Cipher::Aes256Gcm, &KEY, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert!(open(Cipher::Aes256Gcm, &KEY, &sealed).is_err());
    }

    #[test]
    fn cipher_mismatch_fails() {
        let sealed = seal(Cipher::Aes256Gcm, &KEY, b"secret").unwrap();
        assert!(open(Cipher::ChaCha20Poly1305, &KEY, &sealed).is_err());
    }

    #[test]
    fn short_blob_is_malformed() {
        assert!(matches!(
            open(Cipher::Aes256Gcm, &KEY, &[0u8; 10]),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let sealed = seal(Cipher::ChaCha20Poly1305, &KEY, b"").unwrap();
        assert_eq!(sealed.len(), SEALED_OVERHEAD);
        assert!(open(Cipher::ChaCha20Poly1305, &KEY, &sealed)
            .unwrap()
            .is_empty());
    }
}
