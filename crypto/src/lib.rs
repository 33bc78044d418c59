//! Cryptographic primitives for keyguard.
//!
//! - **Argon2id** password-based key derivation for store master keys, and
//!   PHC password hashes for login credentials
//! - **AES-256-GCM** and **ChaCha20-Poly1305** sealing (`nonce ‖ tag ‖ ciphertext`)
//! - **Ed25519** and **secp256k1** (ECDSA) keypairs, signing and verification
//! - **Blake2b** digests
//! - **BLS12-381** (min_pk) signatures and aggregation for multisig

pub mod aead;
pub mod bls;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod password;
pub mod sign;

pub use aead::{open, seal, Cipher, NONCE_LEN, SEALED_OVERHEAD, TAG_LEN};
pub use bls::{
    bls_aggregate, bls_fast_aggregate_verify, bls_generate_keypair, bls_prove_possession,
    bls_sign, bls_verify, bls_verify_possession, BLS_PUBLIC_KEY_LEN, BLS_SIGNATURE_LEN,
};
pub use error::CryptoError;
pub use hash::{blake2b_256, blake2b_256_multi};
pub use kdf::{derive_key, random_salt, KdfParams, SALT_LEN};
pub use keys::{generate_keypair, public_from_secret};
pub use password::{hash_password, verify_password};
pub use sign::{sign, verify};
