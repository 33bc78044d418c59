//! Hardware signer abstraction.
//!
//! Each supported device family (Ledger, Trezor, KeepKey) implements
//! [`HardwareSigner`] on top of a [`DeviceTransport`], the request/response
//! channel to the physical device. The concrete USB/BLE wire protocol lives
//! behind the transport; [`HardwareManager`] keeps the connected-device and
//! derived-key registries, applies timeouts and bounded retries, and records
//! every device operation in a bounded log.

pub mod device;
pub mod error;
pub mod family;
pub mod keepkey;
pub mod ledger;
pub mod log;
pub mod manager;
pub mod path;
pub mod transport;
pub mod trezor;

pub use device::{DerivedKey, DeviceFamily, DeviceInfo, DeviceStatus};
pub use error::HardwareError;
pub use family::HardwareSigner;
pub use keepkey::KeepKeySigner;
pub use ledger::LedgerSigner;
pub use log::{DeviceLog, LogEntry, LogKind};
pub use manager::{DeviceSummary, HardwareManager, HardwareSettings, HardwareStatus};
pub use path::{DerivationPath, DerivationPreset};
pub use transport::{
    DeviceDescriptor, DeviceRequest, DeviceResponse, DeviceTransport, TransportError,
    UnavailableTransport,
};
pub use trezor::TrezorSigner;
