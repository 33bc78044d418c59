//! The request/response channel between a signer and a physical device.
//!
//! A transport owns the wire protocol (HID APDUs, protobuf over USB, ...).
//! Signers speak only in [`DeviceRequest`] / [`DeviceResponse`] pairs.

use async_trait::async_trait;
use keyguard_types::KeyType;
use serde::{Deserialize, Serialize};

use crate::{DerivationPath, DeviceFamily};

/// Static description of an attached device, as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub family: DeviceFamily,
    pub device_path: String,
    pub firmware_version: String,
    pub app_version: Option<String>,
    pub serial_number: Option<String>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceRequest {
    Open,
    Close,
    GetPublicKey { path: DerivationPath },
    Sign { path: DerivationPath, data: Vec<u8> },
    Verify {
        path: DerivationPath,
        data: Vec<u8>,
        signature: Vec<u8>,
    },
    Ping,
}

impl DeviceRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::GetPublicKey { .. } => "get_public_key",
            Self::Sign { .. } => "sign",
            Self::Verify { .. } => "verify",
            Self::Ping => "ping",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceResponse {
    Opened(DeviceDescriptor),
    Closed,
    PublicKey {
        public_key: Vec<u8>,
        key_type: KeyType,
        address: String,
    },
    Signature(Vec<u8>),
    Verified(bool),
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no such device: {0}")]
    NotFound(String),

    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("device busy")]
    Busy,

    #[error("device rejected request (code {code:#06x}): {message}")]
    Rejected { code: u16, message: String },

    #[error("transport I/O: {0}")]
    Io(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Busy | Self::Io(_))
    }
}

#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// List attached devices of one family.
    async fn enumerate(&self, family: DeviceFamily)
        -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Send one request to a device and wait for its response.
    async fn exchange(
        &self,
        device_id: &str,
        request: DeviceRequest,
    ) -> Result<DeviceResponse, TransportError>;
}

/// Transport for hosts with no device bus configured: nothing is attached,
/// and every exchange fails with `NotFound`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTransport;

#[async_trait]
impl DeviceTransport for UnavailableTransport {
    async fn enumerate(
        &self,
        _family: DeviceFamily,
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        Ok(Vec::new())
    }

    async fn exchange(
        &self,
        device_id: &str,
        _request: DeviceRequest,
    ) -> Result<DeviceResponse, TransportError> {
        Err(TransportError::NotFound(device_id.to_string()))
    }
}
