//! The per-family signer interface and the request plumbing the families share.

use std::sync::Arc;

use async_trait::async_trait;
use keyguard_types::{KeyType, PublicKeyBytes, SignatureBytes};

use crate::transport::{DeviceRequest, DeviceResponse, DeviceTransport};
use crate::{DerivationPath, DeviceFamily, DeviceInfo, DeviceStatus, HardwareError};

/// Operations every hardware device family supports.
#[async_trait]
pub trait HardwareSigner: Send + Sync {
    fn family(&self) -> DeviceFamily;

    fn capabilities(&self) -> &'static [&'static str];

    /// Reject paths this family will not derive or sign on.
    fn check_path(&self, path: &DerivationPath) -> Result<(), HardwareError>;

    async fn discover(&self) -> Result<Vec<DeviceInfo>, HardwareError>;

    async fn connect(&self, device_id: &str) -> Result<DeviceInfo, HardwareError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), HardwareError>;

    /// Public key, its algorithm, and the device-rendered address for `path`.
    async fn derive_key(
        &self,
        device_id: &str,
        path: &DerivationPath,
    ) -> Result<(PublicKeyBytes, KeyType, String), HardwareError>;

    async fn sign(
        &self,
        device_id: &str,
        data: &[u8],
        path: &DerivationPath,
    ) -> Result<SignatureBytes, HardwareError>;

    async fn verify(
        &self,
        device_id: &str,
        data: &[u8],
        signature: &[u8],
        path: &DerivationPath,
    ) -> Result<bool, HardwareError>;

    async fn ping(&self, device_id: &str) -> Result<bool, HardwareError>;
}

/// Transport plus family identity; the shared half of every family signer.
pub(crate) struct DeviceChannel {
    pub(crate) family: DeviceFamily,
    pub(crate) capabilities: &'static [&'static str],
    pub(crate) transport: Arc<dyn DeviceTransport>,
}

impl DeviceChannel {
    pub(crate) fn info(&self, descriptor: crate::DeviceDescriptor, status: DeviceStatus) -> DeviceInfo {
        DeviceInfo {
            device_id: descriptor.device_id,
            family: self.family,
            device_path: descriptor.device_path,
            firmware_version: descriptor.firmware_version,
            app_version: descriptor.app_version,
            serial_number: descriptor.serial_number,
            label: descriptor.label,
            status,
            capabilities: self.capabilities.iter().map(|c| c.to_string()).collect(),
            last_connected: None,
            connection_count: 0,
        }
    }

    pub(crate) async fn discover(&self) -> Result<Vec<DeviceInfo>, HardwareError> {
        let descriptors = self.transport.enumerate(self.family).await?;
        Ok(descriptors
            .into_iter()
            .filter(|d| d.family == self.family)
            .map(|d| self.info(d, DeviceStatus::Disconnected))
            .collect())
    }

    pub(crate) async fn open(&self, device_id: &str) -> Result<DeviceInfo, HardwareError> {
        match self.transport.exchange(device_id, DeviceRequest::Open).await? {
            DeviceResponse::Opened(descriptor) if descriptor.family == self.family => {
                Ok(self.info(descriptor, DeviceStatus::Connected))
            }
            DeviceResponse::Opened(_) => Err(HardwareError::DeviceNotFound(device_id.to_string())),
            _ => Err(HardwareError::Protocol("open")),
        }
    }

    pub(crate) async fn close(&self, device_id: &str) -> Result<(), HardwareError> {
        match self.transport.exchange(device_id, DeviceRequest::Close).await? {
            DeviceResponse::Closed => Ok(()),
            _ => Err(HardwareError::Protocol("close")),
        }
    }

    pub(crate) async fn public_key(
        &self,
        device_id: &str,
        path: &DerivationPath,
    ) -> Result<(PublicKeyBytes, KeyType, String), HardwareError> {
        let request = DeviceRequest::GetPublicKey { path: path.clone() };
        match self.transport.exchange(device_id, request).await? {
            DeviceResponse::PublicKey {
                public_key,
                key_type,
                address,
            } => Ok((PublicKeyBytes(public_key), key_type, address)),
            _ => Err(HardwareError::Protocol("get_public_key")),
        }
    }

    pub(crate) async fn sign(
        &self,
        device_id: &str,
        data: &[u8],
        path: &DerivationPath,
    ) -> Result<SignatureBytes, HardwareError> {
        let request = DeviceRequest::Sign {
            path: path.clone(),
            data: data.to_vec(),
        };
        match self.transport.exchange(device_id, request).await? {
            DeviceResponse::Signature(sig) => Ok(SignatureBytes(sig)),
            _ => Err(HardwareError::Protocol("sign")),
        }
    }

    /// Ask the device to check a signature itself.
    pub(crate) async fn verify_on_device(
        &self,
        device_id: &str,
        data: &[u8],
        signature: &[u8],
        path: &DerivationPath,
    ) -> Result<bool, HardwareError> {
        let request = DeviceRequest::Verify {
            path: path.clone(),
            data: data.to_vec(),
            signature: signature.to_vec(),
        };
        match self.transport.exchange(device_id, request).await? {
            DeviceResponse::Verified(ok) => Ok(ok),
            _ => Err(HardwareError::Protocol("verify")),
        }
    }

    /// Fetch the public key for `path` and check the signature on the host.
    pub(crate) async fn verify_on_host(
        &self,
        device_id: &str,
        data: &[u8],
        signature: &[u8],
        path: &DerivationPath,
    ) -> Result<bool, HardwareError> {
        let (public_key, key_type, _) = self.public_key(device_id, path).await?;
        Ok(keyguard_crypto::verify(
            key_type,
            public_key.as_bytes(),
            data,
            signature,
        )?)
    }

    pub(crate) async fn ping(&self, device_id: &str) -> Result<bool, HardwareError> {
        match self.transport.exchange(device_id, DeviceRequest::Ping).await? {
            DeviceResponse::Pong => Ok(true),
            _ => Ok(false),
        }
    }
}

/// BIP44 purpose `44'`.
pub(crate) fn require_bip44_purpose(
    family: DeviceFamily,
    path: &DerivationPath,
) -> Result<(), HardwareError> {
    if path.index(0) == Some(44) && path.is_hardened(0) {
        Ok(())
    } else {
        Err(HardwareError::PathNotAllowed {
            family,
            path: path.to_string(),
        })
    }
}
