//! Ledger devices.
//!
//! The Ledger app only derives on full five-level BIP44 paths with hardened
//! purpose, coin type and account, and has no on-device verify command, so
//! verification fetches the public key and checks on the host.

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
];

pub struct LedgerSigner {
    channel: DeviceChannel,
}

impl LedgerSigner {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            channel: DeviceChannel {
                family: DeviceFamily::Ledger,
                capabilities: CAPABILITIES,
                transport,
            },
        }
    }
}

#[async_trait]
impl HardwareSigner for LedgerSigner {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Ledger
    }

    fn capabilities(&self) -> &'static [&'static str] {
        CAPABILITIES
    }

    fn check_path(&self, path: &DerivationPath) -> Result<(), HardwareError> {
        require_bip44_purpose(DeviceFamily::Ledger, path)?;
        if path.depth() != 5 || !path.is_hardened(1) || !path.is_hardened(2) {
            return Err(HardwareError::PathNotAllowed {
                family: DeviceFamily::Ledger,
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
            .verify_on_host(device_id, data, signature, path)
            .await
    }

    async fn ping(&self, device_id: &str) -> Result<bool, HardwareError> {
        self.channel.ping(device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnavailableTransport;

    fn signer() -> LedgerSigner {
        LedgerSigner::new(Arc::new(UnavailableTransport))
    }

    #[test]
    fn accepts_standard_paths() {
        let s = signer();
        assert!(s.check_path(&"m/44'/195'/0'/0/0".parse().unwrap()).is_ok());
        assert!(s.check_path(&"m/44'/195'/0'/0/1".parse().unwrap()).is_ok());
    }

    #[test]
    fn rejects_short_or_soft_paths() {
        let s = signer();
        for bad in ["m/44'/195'/0'", "m/44'/195/0'/0/0", "m/49'/195'/0'/0/0"] {
            assert!(
                matches!(
                    s.check_path(&bad.parse().unwrap()),
                    Err(HardwareError::PathNotAllowed { .. })
                ),
                "{bad}"
            );
        }
    }
}
