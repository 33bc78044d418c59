//! Nullable device transport: simulated hardware signers.
//!
//! Each fake device holds a seed. The key for a path is Ed25519 from
//! `blake2b(seed ‖ path)`, so derived keys and signatures are deterministic
//! and verify with the real crypto.

use std::collections::HashMap;

use async_trait::async_trait;
use keyguard_hardware::{
    DerivationPath, DeviceDescriptor, DeviceFamily, DeviceRequest, DeviceResponse,
    DeviceTransport, TransportError,
};
use keyguard_types::KeyType;
use parking_lot::Mutex;

#[derive(Clone, Debug)]
pub struct FakeDevice {
    pub descriptor: DeviceDescriptor,
    seed: [u8; 32],
    open: bool,
    /// Requests answered with `Busy` before the device behaves.
    transient_failures: u32,
    /// Never answers; every exchange hangs until the caller times out.
    hung: bool,
    /// Unplugged: answers `Disconnected`.
    unplugged: bool,
}

impl FakeDevice {
    pub fn new(device_id: &str, family: DeviceFamily) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                device_id: device_id.to_string(),
                family,
                device_path: format!("/dev/fake/{device_id}"),
                firmware_version: "2.1.0".to_string(),
                app_version: Some("1.6.0".to_string()),
                serial_number: Some(format!("SN-{device_id}")),
                label: Some(format!("fake {family}")),
            },
            seed: keyguard_crypto::blake2b_256(device_id.as_bytes()),
            open: false,
            transient_failures: 0,
            hung: false,
            unplugged: false,
        }
    }

    fn secret_for(&self, path: &DerivationPath) -> [u8; 32] {
        keyguard_crypto::blake2b_256_multi(&[&self.seed, path.to_string().as_bytes()])
    }
}

/// In-memory transport over a set of [`FakeDevice`]s. Every request is
/// recorded for assertions.
#[derive(Default)]
pub struct FakeTransport {
    devices: Mutex<HashMap<String, FakeDevice>>,
    requests: Mutex<Vec<(String, &'static str)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device_id: &str, family: DeviceFamily) -> Self {
        self.attach(FakeDevice::new(device_id, family));
        self
    }

    pub fn attach(&self, device: FakeDevice) {
        self.devices
            .lock()
            .insert(device.descriptor.device_id.clone(), device);
    }

    /// Answer the next `n` requests to `device_id` with `Busy`.
    pub fn fail_next(&self, device_id: &str, n: u32) {
        if let Some(d) = self.devices.lock().get_mut(device_id) {
            d.transient_failures = n;
        }
    }

    pub fn set_hung(&self, device_id: &str, hung: bool) {
        if let Some(d) = self.devices.lock().get_mut(device_id) {
            d.hung = hung;
        }
    }

    pub fn set_unplugged(&self, device_id: &str, unplugged: bool) {
        if let Some(d) = self.devices.lock().get_mut(device_id) {
            d.unplugged = unplugged;
        }
    }

    pub fn is_open(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .get(device_id)
            .is_some_and(|d| d.open)
    }

    /// Names of the requests sent to `device_id`, in order.
    pub fn requests_for(&self, device_id: &str) -> Vec<&'static str> {
        self.requests
            .lock()
            .iter()
            .filter(|(d, _)| d == device_id)
            .map(|(_, r)| *r)
            .collect()
    }

    fn answer(
        &self,
        device_id: &str,
        request: DeviceRequest,
    ) -> Result<Option<DeviceResponse>, TransportError> {
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| TransportError::NotFound(device_id.to_string()))?;

        if device.hung {
            return Ok(None);
        }
        if device.unplugged {
            return Err(TransportError::Disconnected(device_id.to_string()));
        }
        if device.transient_failures > 0 {
            device.transient_failures -= 1;
            return Err(TransportError::Busy);
        }

        let response = match request {
            DeviceRequest::Open => {
                device.open = true;
                DeviceResponse::Opened(device.descriptor.clone())
            }
            DeviceRequest::Close => {
                device.open = false;
                DeviceResponse::Closed
            }
            _ if !device.open => {
                return Err(TransportError::Rejected {
                    code: 0x6985,
                    message: "device not opened".to_string(),
                })
            }
            DeviceRequest::GetPublicKey { path } => {
                let secret = device.secret_for(&path);
                let public = keyguard_crypto::public_from_secret(KeyType::Ed25519, &secret)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                let digest = keyguard_crypto::blake2b_256(public.as_bytes());
                DeviceResponse::PublicKey {
                    address: format!("T{}", hex::encode(&digest[..20])),
                    public_key: public.0,
                    key_type: KeyType::Ed25519,
                }
            }
            DeviceRequest::Sign { path, data } => {
                let secret = device.secret_for(&path);
                let sig = keyguard_crypto::sign(KeyType::Ed25519, &secret, &data)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                DeviceResponse::Signature(sig.0)
            }
            DeviceRequest::Verify {
                path,
                data,
                signature,
            } => {
                let secret = device.secret_for(&path);
                let public = keyguard_crypto::public_from_secret(KeyType::Ed25519, &secret)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                let ok = keyguard_crypto::verify(KeyType::Ed25519, public.as_bytes(), &data, &signature)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                DeviceResponse::Verified(ok)
            }
            DeviceRequest::Ping => DeviceResponse::Pong,
        };
        Ok(Some(response))
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn enumerate(
        &self,
        family: DeviceFamily,
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut found: Vec<DeviceDescriptor> = self
            .devices
            .lock()
            .values()
            .filter(|d| d.descriptor.family == family && !d.unplugged)
            .map(|d| d.descriptor.clone())
            .collect();
        found.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(found)
    }

    async fn exchange(
        &self,
        device_id: &str,
        request: DeviceRequest,
    ) -> Result<DeviceResponse, TransportError> {
        self.requests
            .lock()
            .push((device_id.to_string(), request.name()));
        match self.answer(device_id, request)? {
            Some(response) => Ok(response),
            None => std::future::pending().await,
        }
    }
}
