//! N-of-M signature collection.
//!
//! A wallet names its signers and a threshold. A transaction collects
//! independently verified signatures over its payload until the threshold
//! is met, then combines them into an [`Authorization`] under the wallet's
//! [`AuthorizationScheme`].

pub mod authorization;
pub mod error;
pub mod manager;
mod records;
pub mod transaction;
pub mod wallet;

pub use authorization::{Authorization, AuthorizedSignature, BlsAuthorization, MultiKeyAuthorization};
pub use error::MultisigError;
pub use manager::{MultisigManager, MultisigSettings, MultisigSummary, WalletInfo};
pub use transaction::{
    CollectedSignature, MultisigTransaction, TransactionInfo, TransactionStatus, TransactionType,
};
pub use wallet::{AuthorizationScheme, MultisigWallet, Signer, SignerKeyKind, SignerRole, SignerSpec};
