//! Custody daemon configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use keyguard_crypto::KdfParams;
use keyguard_hardware::HardwareSettings;
use keyguard_keystore::{KeyStoreSettings, VaultSettings};
use keyguard_multisig::MultisigSettings;
use keyguard_rbac::RbacSettings;
use keyguard_rotation::RotationSettings;

use crate::NodeError;

/// Configuration for a keyguard node.
///
/// Can be loaded from a TOML file via [`KeyguardConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field has a default, so an
/// empty file is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyguardConfig {
    /// Root directory for the keystore, vault and manager state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub kdf: KdfConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub multisig: MultisigConfig,

    #[serde(default)]
    pub rbac: RbacConfig,
}

/// Argon2id cost for new stores and credential hashes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub max_failed_attempts: u32,
    pub lockout_secs: u64,
    pub session_timeout_secs: u64,
    pub max_keys: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub retry_attempts: u32,
    pub liveness_interval_secs: u64,
    pub log_capacity: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub scan_interval_secs: u64,
    /// Finished rotation tasks older than this are pruned.
    pub task_retention_secs: u64,
    pub event_capacity: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MultisigConfig {
    pub default_ttl_secs: u64,
    pub max_signers: usize,
    pub min_signers: usize,
    pub retention_secs: u64,
    pub cleanup_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    pub audit_retention_days: u64,
    pub sweep_interval_secs: u64,
    pub max_session_secs: u64,
    pub max_failed_logins: u32,
    pub lockout_secs: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./keyguard_data")
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for KdfConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            memory_kib: params.memory_kib,
            iterations: params.iterations,
            parallelism: params.parallelism,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_secs: 1800,
            session_timeout_secs: 3600,
            max_keys: 1_000,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            operation_timeout_secs: 30,
            retry_attempts: 3,
            liveness_interval_secs: 30,
            log_capacity: 10_000,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 3600,
            task_retention_secs: 90 * 86_400,
            event_capacity: 10_000,
        }
    }
}

impl Default for MultisigConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_signers: 10,
            min_signers: 2,
            retention_secs: 7 * 86_400,
            cleanup_interval_secs: 600,
        }
    }
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            audit_retention_days: 90,
            sweep_interval_secs: 60,
            max_session_secs: 8 * 3600,
            max_failed_logins: 5,
            lockout_secs: 1800,
        }
    }
}

// ── Impl ───────────────────────────────────────────────────────────────

impl KeyguardConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// A configuration rooted at `data_dir` with every other value default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn keystore_dir(&self) -> PathBuf {
        self.data_dir.join("keystore")
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.data_dir.join("vault")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.log")
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.kdf.memory_kib,
            iterations: self.kdf.iterations,
            parallelism: self.kdf.parallelism,
        }
    }

    pub fn keystore_settings(&self) -> KeyStoreSettings {
        KeyStoreSettings {
            kdf: self.kdf_params(),
            ..Default::default()
        }
    }

    pub fn vault_settings(&self) -> VaultSettings {
        VaultSettings {
            kdf: self.kdf_params(),
            max_failed_attempts: self.vault.max_failed_attempts,
            lockout_secs: self.vault.lockout_secs,
            session_timeout_secs: self.vault.session_timeout_secs,
            max_keys: self.vault.max_keys,
        }
    }

    pub fn hardware_settings(&self) -> HardwareSettings {
        HardwareSettings {
            connect_timeout: Duration::from_secs(self.hardware.connect_timeout_secs),
            operation_timeout: Duration::from_secs(self.hardware.operation_timeout_secs),
            retry_attempts: self.hardware.retry_attempts,
            log_capacity: self.hardware.log_capacity,
            ..Default::default()
        }
    }

    pub fn rotation_settings(&self) -> RotationSettings {
        RotationSettings {
            event_capacity: self.rotation.event_capacity,
            state_file: Some(self.data_dir.join("rotation.json")),
        }
    }

    pub fn multisig_settings(&self) -> MultisigSettings {
        MultisigSettings {
            default_ttl_secs: self.multisig.default_ttl_secs,
            max_signers: self.multisig.max_signers,
            min_signers: self.multisig.min_signers,
            retention_secs: self.multisig.retention_secs,
            data_dir: Some(self.data_dir.join("multisig")),
        }
    }

    pub fn rbac_settings(&self) -> RbacSettings {
        RbacSettings {
            max_session_secs: self.rbac.max_session_secs,
            audit_retention_days: self.rbac.audit_retention_days,
            max_failed_logins: self.rbac.max_failed_logins,
            lockout_secs: self.rbac.lockout_secs,
            credential_kdf: self.kdf_params(),
            state_file: Some(self.data_dir.join("rbac.json")),
        }
    }
}

impl Default for KeyguardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            kdf: KdfConfig::default(),
            vault: VaultConfig::default(),
            hardware: HardwareConfig::default(),
            rotation: RotationConfig::default(),
            multisig: MultisigConfig::default(),
            rbac: RbacConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = KeyguardConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = KeyguardConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.vault.lockout_secs, config.vault.lockout_secs);
        assert_eq!(parsed.multisig.max_signers, config.multisig.max_signers);
        assert_eq!(parsed.kdf.memory_kib, 65536);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = KeyguardConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.log_format, "human");
        assert_eq!(config.vault.max_failed_attempts, 5);
        assert_eq!(config.hardware.connect_timeout_secs, 30);
        assert_eq!(config.multisig.default_ttl_secs, 300);
        assert_eq!(config.rbac.audit_retention_days, 90);
        assert_eq!(config.rbac.max_session_secs, 28_800);
    }

    #[test]
    fn partial_sections_override() {
        let toml = r#"
            data_dir = "/var/lib/keyguard"

            [vault]
            lockout_secs = 60

            [rbac]
            audit_retention_days = 30
        "#;
        let config = KeyguardConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.vault.lockout_secs, 60);
        assert_eq!(config.vault.max_failed_attempts, 5); // default
        assert_eq!(config.rbac.audit_retention_days, 30);
        assert_eq!(config.rbac_settings().audit_retention_days, 30);
        assert_eq!(
            config.rotation_settings().state_file,
            Some(PathBuf::from("/var/lib/keyguard/rotation.json"))
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = KeyguardConfig::default();
        config.hardware.connect_timeout_secs = 5;
        config.kdf.iterations = 1;
        assert_eq!(config.hardware_settings().connect_timeout, Duration::from_secs(5));
        assert_eq!(config.vault_settings().kdf.iterations, 1);
        assert_eq!(config.keystore_settings().kdf.iterations, 1);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = KeyguardConfig::from_toml_file(Path::new("/nonexistent/keyguard.toml"));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
