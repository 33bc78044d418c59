//! Keyguard custody node.
//!
//! Wires the keystore, vault, hardware, rotation, multisig and RBAC crates
//! into one [`CustodyContext`], and runs their periodic maintenance from
//! [`KeyguardNode`]:
//! - Hardware liveness sweeps
//! - Scheduled key rotation and task pruning
//! - Multisig expiry and cleanup
//! - RBAC session sweeps and audit retention

pub mod config;
pub mod context;
pub mod error;
pub mod node;
pub mod shutdown;

pub use config::{
    HardwareConfig, KdfConfig, KeyguardConfig, MultisigConfig, RbacConfig, RotationConfig,
    VaultConfig,
};
pub use context::{CustodyContext, CustodyStatus, InitOptions};
pub use error::NodeError;
pub use node::{KeyguardNode, SYSTEM_ACTOR};
pub use shutdown::{ShutdownController, ShutdownListener, ShutdownReason};
