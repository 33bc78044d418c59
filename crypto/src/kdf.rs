//! Argon2id password-based key derivation.
//!
//! Store master keys are derived from the passphrase and a per-store random
//! salt. The output is wrapped in [`Zeroizing`] so it is wiped when dropped.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 32;
const OUTPUT_LEN: usize = 32;

/// Argon2id cost parameters. Persisted alongside each store so a store
/// created with one profile can still be opened after the defaults change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost profile for tests and throwaway stores.
    pub fn light() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Derive a 32-byte key from `password` and `salt`.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(OUTPUT_LEN),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut output = Zeroizing::new([0u8; OUTPUT_LEN]);
    argon2
        .hash_password_into(password, salt, output.as_mut())
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(output)
}

/// Fresh random salt from the OS RNG.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_key() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key(b"Sw0rd!Fish", &salt, &KdfParams::light()).unwrap();
        let b = derive_key(b"Sw0rd!Fish", &salt, &KdfParams::light()).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn salt_changes_key() {
        let a = derive_key(b"pw", &[1u8; SALT_LEN], &KdfParams::light()).unwrap();
        let b = derive_key(b"pw", &[2u8; SALT_LEN], &KdfParams::light()).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn password_changes_key() {
        let salt = random_salt();
        let a = derive_key(b"one", &salt, &KdfParams::light()).unwrap();
        let b = derive_key(b"two", &salt, &KdfParams::light()).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn rejects_degenerate_params() {
        let params = KdfParams {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(matches!(
            derive_key(b"pw", &[0u8; SALT_LEN], &params),
            Err(CryptoError::Kdf(_))
        ));
    }
}
