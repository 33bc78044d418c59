//! Fundamental types for keyguard.
//!
//! This crate defines the types shared across every other crate in the workspace:
//! timestamps and clocks, identifiers, key classification enums, and the
//! byte wrappers used for public keys, signatures and secret material.

pub mod clock;
pub mod id;
pub mod keys;
pub mod serde_hex;
pub mod time;

pub use clock::{Clock, SharedClock, SystemClock};
pub use id::random_id;
pub use keys::{KeyStatus, KeyType, KeyUsage, PublicKeyBytes, SecretBytes, SignatureBytes};
pub use time::Timestamp;
