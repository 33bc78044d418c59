//! Connected-device and derived-key registries over a set of family signers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keyguard_types::{random_id, SharedClock, SignatureBytes};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::family::HardwareSigner;
use crate::log::{DeviceLog, LogEntry, LogKind};
use crate::{
    DerivationPath, DerivationPreset, DerivedKey, DeviceFamily, DeviceInfo, DeviceStatus,
    HardwareError,
};

#[derive(Clone, Debug)]
pub struct HardwareSettings {
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub log_capacity: usize,
    pub max_derived_keys: usize,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            log_capacity: 10_000,
            max_derived_keys: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub family: DeviceFamily,
    pub status: DeviceStatus,
    pub firmware_version: String,
    pub connection_count: u32,
    pub derived_keys: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct HardwareStatus {
    pub connected_devices: usize,
    pub derived_keys: usize,
    pub log_entries: usize,
    pub total_operations: u64,
    pub devices: Vec<DeviceSummary>,
}

pub struct HardwareManager {
    settings: HardwareSettings,
    clock: SharedClock,
    signers: HashMap<DeviceFamily, Arc<dyn HardwareSigner>>,
    connected: RwLock<HashMap<String, DeviceInfo>>,
    /// Survives disconnects so reconnects keep counting.
    connection_counts: Mutex<HashMap<String, u32>>,
    derived: RwLock<HashMap<String, DerivedKey>>,
    log: Mutex<DeviceLog>,
}

impl HardwareManager {
    pub fn new(
        settings: HardwareSettings,
        clock: SharedClock,
        signers: Vec<Arc<dyn HardwareSigner>>,
    ) -> Self {
        let log = Mutex::new(DeviceLog::new(settings.log_capacity));
        Self {
            settings,
            clock,
            signers: signers.into_iter().map(|s| (s.family(), s)).collect(),
            connected: RwLock::new(HashMap::new()),
            connection_counts: Mutex::new(HashMap::new()),
            derived: RwLock::new(HashMap::new()),
            log,
        }
    }

    pub fn settings(&self) -> &HardwareSettings {
        &self.settings
    }

    fn signer(&self, family: DeviceFamily) -> Result<Arc<dyn HardwareSigner>, HardwareError> {
        self.signers
            .get(&family)
            .cloned()
            .ok_or(HardwareError::NoSigner(family))
    }

    fn connected_signer(
        &self,
        device_id: &str,
    ) -> Result<(Arc<dyn HardwareSigner>, DeviceFamily), HardwareError> {
        let family = self
            .connected
            .read()
            .get(device_id)
            .map(|d| d.family)
            .ok_or_else(|| HardwareError::NotConnected(device_id.to_string()))?;
        Ok((self.signer(family)?, family))
    }

    /// Run `attempt` under `timeout`, retrying transient failures up to the
    /// configured budget before reporting the device unreachable.
    async fn with_retry<T, F, Fut>(
        &self,
        device_id: &str,
        op: &'static str,
        timeout: Duration,
        mut attempt: F,
    ) -> Result<T, HardwareError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HardwareError>>,
    {
        let attempts = self.settings.retry_attempts.max(1);
        let mut last_error = String::new();
        for n in 1..=attempts {
            let err = match tokio::time::timeout(timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => HardwareError::Timeout {
                    device_id: device_id.to_string(),
                    secs: timeout.as_secs(),
                },
            };
            warn!(device = %device_id, op, attempt = n, error = %err, "device operation failed");
            last_error = err.to_string();
            if n < attempts {
                tokio::time::sleep(self.settings.retry_backoff * n).await;
            }
        }
        Err(HardwareError::DeviceUnreachable {
            device_id: device_id.to_string(),
            attempts,
            last_error,
        })
    }

    fn record(
        &self,
        device_id: &str,
        kind: LogKind,
        data: &[u8],
        signature: Option<&[u8]>,
        error: Option<&HardwareError>,
    ) {
        let entry = LogEntry {
            id: random_id(),
            device_id: device_id.to_string(),
            kind,
            success: error.is_none(),
            error: error.map(|e| e.to_string()),
            timestamp: self.clock.now(),
            data_digest: hex::encode(keyguard_crypto::blake2b_256(data)),
            signature: signature.map(hex::encode),
        };
        self.log.lock().push(entry);
    }

    fn mark(&self, device_id: &str, status: DeviceStatus) {
        if let Some(device) = self.connected.write().get_mut(device_id) {
            device.status = status;
        }
    }

    /// Enumerate devices of every registered family. A family whose
    /// enumeration fails is skipped.
    pub async fn discover(&self) -> Vec<DeviceInfo> {
        let mut found = Vec::new();
        for (family, signer) in &self.signers {
            match signer.discover().await {
                Ok(devices) => found.extend(devices),
                Err(e) => warn!(%family, error = %e, "device discovery failed"),
            }
        }
        info!(count = found.len(), "discovered hardware devices");
        found
    }

    /// Connect to a device. Connecting an already-connected device returns
    /// its current info.
    pub async fn connect(
        &self,
        device_id: &str,
        family: DeviceFamily,
    ) -> Result<DeviceInfo, HardwareError> {
        if let Some(existing) = self.connected.read().get(device_id) {
            return Ok(existing.clone());
        }
        let signer = self.signer(family)?;
        let result = self
            .with_retry(device_id, "connect", self.settings.connect_timeout, || {
                signer.connect(device_id)
            })
            .await;

        let label = format!("connect {family}");
        match result {
            Ok(mut info) => {
                {
                    // A concurrent connect may have finished first; the
                    // registry keeps its entry and the count is not bumped.
                    let mut connected = self.connected.write();
                    if let Some(existing) = connected.get(device_id) {
                        return Ok(existing.clone());
                    }
                    let count = {
                        let mut counts = self.connection_counts.lock();
                        let count = counts.entry(device_id.to_string()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    info.connection_count = count;
                    info.last_connected = Some(self.clock.now());
                    info.status = DeviceStatus::Ready;
                    connected.insert(device_id.to_string(), info.clone());
                }
                self.record(device_id, LogKind::Connect, label.as_bytes(), None, None);
                info!(device = %device_id, %family, "connected hardware device");
                Ok(info)
            }
            Err(e) => {
                self.record(device_id, LogKind::Connect, label.as_bytes(), None, Some(&e));
                Err(e)
            }
        }
    }

    /// Disconnect a device and forget every key derived from it. Returns
    /// `false` if the device was not connected.
    pub async fn disconnect(&self, device_id: &str) -> Result<bool, HardwareError> {
        let Ok((signer, family)) = self.connected_signer(device_id) else {
            return Ok(false);
        };
        // The registry entry goes regardless; a device that cannot be closed
        // cleanly is as good as gone.
        if let Err(e) = tokio::time::timeout(
            self.settings.operation_timeout,
            signer.disconnect(device_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(HardwareError::Timeout {
                device_id: device_id.to_string(),
                secs: self.settings.operation_timeout.as_secs(),
            })
        }) {
            warn!(device = %device_id, error = %e, "device did not close cleanly");
        }

        self.connected.write().remove(device_id);
        let dropped = {
            let mut derived = self.derived.write();
            let before = derived.len();
            derived.retain(|_, k| k.device_id != device_id);
            before - derived.len()
        };
        let label = format!("disconnect {family}");
        self.record(device_id, LogKind::Disconnect, label.as_bytes(), None, None);
        info!(device = %device_id, dropped_keys = dropped, "disconnected hardware device");
        Ok(true)
    }

    pub async fn derive_key(
        &self,
        device_id: &str,
        preset: DerivationPreset,
        label: Option<String>,
    ) -> Result<DerivedKey, HardwareError> {
        let (signer, family) = self.connected_signer(device_id)?;
        let path = preset.path()?;
        if self.derived.read().len() >= self.settings.max_derived_keys {
            return Err(HardwareError::KeyLimit(self.settings.max_derived_keys));
        }

        let result = self
            .with_retry(device_id, "derive", self.settings.operation_timeout, || {
                signer.derive_key(device_id, &path)
            })
            .await;
        let payload = path.to_string();
        let (public_key, key_type, address) = match result {
            Ok(v) => v,
            Err(e) => {
                self.fail(device_id, LogKind::Derive, payload.as_bytes(), &e);
                return Err(e);
            }
        };

        let key = DerivedKey {
            key_id: random_id(),
            device_id: device_id.to_string(),
            family,
            path,
            preset: preset.name().to_string(),
            public_key,
            key_type,
            address,
            label,
            created_at: self.clock.now(),
            last_used: None,
            usage_count: 0,
            active: true,
        };
        self.derived.write().insert(key.key_id.clone(), key.clone());
        self.record(device_id, LogKind::Derive, payload.as_bytes(), None, None);
        info!(device = %device_id, key_id = %key.key_id, path = %key.path, "derived hardware key");
        Ok(key)
    }

    /// Resolve the path for an operation: the registered key's path, else the
    /// explicit path, else the standard preset.
    fn resolve_path(
        &self,
        key_id: Option<&str>,
        path: Option<DerivationPath>,
    ) -> Result<DerivationPath, HardwareError> {
        if let Some(key_id) = key_id {
            return self
                .derived
                .read()
                .get(key_id)
                .map(|k| k.path.clone())
                .ok_or_else(|| HardwareError::KeyNotFound(key_id.to_string()));
        }
        match path {
            Some(p) => Ok(p),
            None => DerivationPreset::Standard.path(),
        }
    }

    fn fail(&self, device_id: &str, kind: LogKind, data: &[u8], error: &HardwareError) {
        if matches!(
            error,
            HardwareError::DeviceUnreachable { .. } | HardwareError::Timeout { .. }
        ) {
            self.mark(device_id, DeviceStatus::Error);
        }
        self.record(device_id, kind, data, None, Some(error));
    }

    pub async fn sign(
        &self,
        device_id: &str,
        data: &[u8],
        key_id: Option<&str>,
        path: Option<DerivationPath>,
    ) -> Result<SignatureBytes, HardwareError> {
        let (signer, _) = self.connected_signer(device_id)?;
        let path = self.resolve_path(key_id, path)?;

        let result = self
            .with_retry(device_id, "sign", self.settings.operation_timeout, || {
                signer.sign(device_id, data, &path)
            })
            .await;
        match result {
            Ok(signature) => {
                if let Some(key_id) = key_id {
                    if let Some(key) = self.derived.write().get_mut(key_id) {
                        key.usage_count += 1;
                        key.last_used = Some(self.clock.now());
                    }
                }
                self.record(
                    device_id,
                    LogKind::Sign,
                    data,
                    Some(signature.as_bytes()),
                    None,
                );
                info!(device = %device_id, path = %path, "signed with hardware device");
                Ok(signature)
            }
            Err(e) => {
                self.fail(device_id, LogKind::Sign, data, &e);
                Err(e)
            }
        }
    }

    pub async fn verify(
        &self,
        device_id: &str,
        data: &[u8],
        signature: &[u8],
        key_id: Option<&str>,
        path: Option<DerivationPath>,
    ) -> Result<bool, HardwareError> {
        let (signer, _) = self.connected_signer(device_id)?;
        let path = self.resolve_path(key_id, path)?;

        let result = self
            .with_retry(device_id, "verify", self.settings.operation_timeout, || {
                signer.verify(device_id, data, signature, &path)
            })
            .await;
        match result {
            Ok(valid) => {
                self.record(device_id, LogKind::Verify, data, Some(signature), None);
                info!(device = %device_id, valid, "verified signature with hardware device");
                Ok(valid)
            }
            Err(e) => {
                self.fail(device_id, LogKind::Verify, data, &e);
                Err(e)
            }
        }
    }

    pub fn connected_devices(&self) -> Vec<DeviceInfo> {
        self.connected.read().values().cloned().collect()
    }

    pub fn derived_keys(&self, device_id: Option<&str>) -> Vec<DerivedKey> {
        self.derived
            .read()
            .values()
            .filter(|k| device_id.map_or(true, |d| k.device_id == d))
            .cloned()
            .collect()
    }

    /// Ping every connected device once. Unresponsive devices are marked
    /// `Error`; an `Error` device that answers again returns to `Ready`.
    /// Returns the number of devices found unresponsive.
    pub async fn liveness_sweep(&self) -> usize {
        let devices: Vec<(String, DeviceFamily)> = self
            .connected
            .read()
            .values()
            .map(|d| (d.device_id.clone(), d.family))
            .collect();

        let mut unresponsive = 0;
        for (device_id, family) in devices {
            let Ok(signer) = self.signer(family) else {
                continue;
            };
            let alive = matches!(
                tokio::time::timeout(self.settings.operation_timeout, signer.ping(&device_id)).await,
                Ok(Ok(true))
            );
            if alive {
                let mut connected = self.connected.write();
                if let Some(device) = connected.get_mut(&device_id) {
                    if device.status == DeviceStatus::Error {
                        info!(device = %device_id, "hardware device responsive again");
                        device.status = DeviceStatus::Ready;
                    }
                }
            } else {
                warn!(device = %device_id, "hardware device not responding");
                self.mark(&device_id, DeviceStatus::Error);
                unresponsive += 1;
            }
        }
        unresponsive
    }

    /// Up to `n` log entries, newest first.
    pub fn recent_log(&self, n: usize) -> Vec<LogEntry> {
        self.log.lock().recent(n)
    }

    pub fn status(&self) -> HardwareStatus {
        let connected = self.connected.read();
        let derived = self.derived.read();
        let log = self.log.lock();
        let mut devices: Vec<DeviceSummary> = connected
            .values()
            .map(|d| DeviceSummary {
                device_id: d.device_id.clone(),
                family: d.family,
                status: d.status,
                firmware_version: d.firmware_version.clone(),
                connection_count: d.connection_count,
                derived_keys: derived.values().filter(|k| k.device_id == d.device_id).count(),
            })
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        HardwareStatus {
            connected_devices: connected.len(),
            derived_keys: derived.len(),
            log_entries: log.len(),
            total_operations: log.total(),
            devices,
        }
    }

    /// Disconnect every device. Used on shutdown.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.connected.read().keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                warn!(device = %id, error = %e, "failed to disconnect on shutdown");
            }
        }
    }
}
