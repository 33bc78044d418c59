//! Argon2id password hashes in PHC string format, for login credentials.
//!
//! Unlike [`derive_key`](crate::derive_key) the salt and cost parameters
//! travel inside the hash string, so verification needs nothing else.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{CryptoError, KdfParams};

/// Hash `password` with a fresh 16-byte salt.
pub fn hash_password(password: &str, params: &KdfParams) -> Result<String, CryptoError> {
    let argon_params = Params::new(params.memory_kib, params.iterations, params.parallelism, None)
        .map_err(|e| CryptoError::Kdf(format!("invalid Argon2 params: {e}")))?;
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::Kdf(e.to_string()))
}

/// Check `password` against a PHC hash. A malformed hash never verifies.
pub fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
