use keyguard_types::{KeyType, PublicKeyBytes, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DerivationPath;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    Ledger,
    Trezor,
    KeepKey,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ledger => write!(f, "ledger"),
            Self::Trezor => write!(f, "trezor"),
            Self::KeepKey => write!(f, "keepkey"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    Error,
    Locked,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub family: DeviceFamily,
    pub device_path: String,
    pub firmware_version: String,
    pub app_version: Option<String>,
    pub serial_number: Option<String>,
    pub label: Option<String>,
    pub status: DeviceStatus,
    pub capabilities: Vec<String>,
    pub last_connected: Option<Timestamp>,
    pub connection_count: u32,
}

/// A key derived on a device and registered with the manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedKey {
    pub key_id: String,
    pub device_id: String,
    pub family: DeviceFamily,
    pub path: DerivationPath,
    pub preset: String,
    pub public_key: PublicKeyBytes,
    pub key_type: KeyType,
    pub address: String,
    pub label: Option<String>,
    pub created_at: Timestamp,
    pub last_used: Option<Timestamp>,
    pub usage_count: u64,
    pub active: bool,
}
