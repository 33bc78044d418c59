//! Trezor devices. Accepts BIP44 paths of depth three to five and verifies
//! signatures on the device itself.

use std::sync::Arc;

use async_trait::async_trait;
use keyguard_types::{KeyType, PublicKeyBytes, SignatureBytes};

use crate::family::{require_bip44_purpose, DeviceChannel, HardwareSigner};
use crate::{DerivationPath, DeviceFamily, DeviceInfo, DeviceTransport, HardwareError};

const CAPABILITIES: &[&str] = &[
    "tron_signing",
    "message_signing",
    "address_derivation",
    "secure_storage",
    "multisig_support",
    "on_device_verify",
];

pub struct TrezorSigner {
    channel: DeviceChannel,
}

impl TrezorSigner {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            channel: DeviceChannel {
                family: DeviceFamily::Trezor,
                capabilities: CAPABILITIES,
                transport,
            },
        }
    }
}

#[async_trait]
impl HardwareSigner for TrezorSigner {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Trezor
    }

    fn capabilities(&self) -> &'static [&'static str] {
        CAPABILITIES
    }

    fn check_path(&self, path: &DerivationPath) -> Result<(), HardwareError> {
        require_bip44_purpose(DeviceFamily::Trezor, path)?;
        if !(3..=5).contains(&path.depth()) {
            return Err(HardwareError::PathNotAllowed {
                family: DeviceFamily::Trezor,
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<DeviceInfo>, HardwareError> {
        self.channel.discover().await
    }

    async fn connect(&self, device_id: &str) -> Result<DeviceInfo, HardwareError> {
        self.channel.open(device_id).await
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), HardwareError> {
        self.channel.close(device_id).await
    }

    async fn derive_key(
        &self,
        device_id: &str,
        path: &DerivationPath,
    ) -> Result<(PublicKeyBytes, KeyType, String), HardwareError> {
        self.check_path(path)?;
        self.channel.public_key(device_id, path).await
    }

    async fn sign(
        &self,
        device_id: &str,
        data: &[u8],
        path: &DerivationPath,
    ) -> Result<SignatureBytes, HardwareError> {
        self.check_path(path)?;
        self.channel.sign(device_id, data, path).await
    }

    async fn verify(
        &self,
        device_id: &str,
        data: &[u8],
        signature: &[u8],
        path: &DerivationPath,
    ) -> Result<bool, HardwareError> {
        self.check_path(path)?;
        self.channel
            .verify_on_device(device_id, data, signature, path)
            .await
    }

    async fn ping(&self, device_id: &str) -> Result<bool, HardwareError> {
        self.channel.ping(device_id).await
    }
}
