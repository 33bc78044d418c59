//! Encrypted key custody on local disk.
//!
//! Two stores share the same cryptographic shape but serve different
//! deployments:
//!
//! - [`KeyStore`]: the durable, versioned key repository. Keys carry usage
//!   budgets, expiry and rotation links.
//! - [`SoftwareVault`]: an operator vault with brute-force lockout and its
//!   own access-levelled sessions.
//!
//! Both derive a master key from a passphrase with Argon2id, prove it by
//! opening a canary, and seal each private key individually.

pub mod error;
mod files;
pub mod record;
pub mod store;
pub mod vault;

pub use error::KeystoreError;
pub use record::{KeyFilter, KeyInfo, KeySpec, StoredKey};
pub use store::{KeyStore, KeyStoreSettings, KeystoreMetadata, KeystoreSummary, StoreStatus};
pub use vault::{
    AccessLevel, SoftwareVault, VaultKeyInfo, VaultMetadata, VaultSession, VaultSettings,
    VaultStatus, VaultSummary,
};
