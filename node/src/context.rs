//! One owner for every custody component.
//!
//! [`CustodyContext`] holds the keystore, vault, hardware manager, rotation
//! manager, multisig manager and role manager. Each operation takes an RBAC
//! session id and is authorized before any component is touched; a denial
//! is audited by the role manager and returned as [`NodeError::Rbac`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use keyguard_hardware::{
    DerivationPath, DerivationPreset, DerivedKey, DeviceFamily, DeviceInfo, DeviceTransport,
    HardwareError, HardwareManager, HardwareSigner, HardwareStatus, KeepKeySigner, LedgerSigner,
    TrezorSigner,
};
use keyguard_keystore::{
    AccessLevel as VaultAccess, KeyFilter, KeyInfo, KeySpec, KeyStore, KeystoreSummary,
    SoftwareVault, StoreStatus, VaultKeyInfo, VaultSummary,
};
use keyguard_multisig::{
    Authorization, AuthorizationScheme, MultisigManager, MultisigSummary, SignerSpec,
    TransactionInfo, TransactionStatus, TransactionType, WalletInfo,
};
use keyguard_rbac::{
    AuditEvent, AuditQuery, AuditSink, ClientInfo, JsonLinesAuditSink, Permission, RbacSummary,
    Role, RoleAssignment, RoleManager, Session, TracingAuditSink,
};
use keyguard_rotation::{
    KeyBackend, KeyRotationManager, KeyRotationStatus, RotationPolicy, RotationSummary,
    RotationTrigger, TaskStatus,
};
use keyguard_types::{KeyType, PublicKeyBytes, SecretBytes, SharedClock, SignatureBytes};
use serde::Serialize;
use tracing::info;

use crate::{KeyguardConfig, NodeError};

/// Secrets needed to lay down a fresh custody directory.
pub struct InitOptions<'a> {
    pub name: &'a str,
    pub admin_user: &'a str,
    pub admin_password: &'a str,
    pub keystore_passphrase: &'a str,
    pub vault_passphrase: &'a str,
}

#[derive(Clone, Debug, Serialize)]
pub struct CustodyStatus {
    pub keystore: KeystoreSummary,
    pub vault: VaultSummary,
    pub hardware: HardwareStatus,
    pub rotation: RotationSummary,
    pub multisig: MultisigSummary,
    pub rbac: RbacSummary,
}

pub struct CustodyContext {
    config: KeyguardConfig,
    keystore: Arc<KeyStore>,
    vault: SoftwareVault,
    hardware: HardwareManager,
    rotation: KeyRotationManager,
    multisig: Arc<MultisigManager>,
    rbac: RoleManager,
}

impl CustodyContext {
    /// Create the keystore and vault under `config.data_dir` and make
    /// `admin_user` the master with a login credential.
    pub fn initialize(
        config: &KeyguardConfig,
        clock: SharedClock,
        options: &InitOptions<'_>,
    ) -> Result<(), NodeError> {
        let keystore_dir = config.keystore_dir();
        if KeyStore::probe(&keystore_dir) != StoreStatus::Uninitialized {
            return Err(NodeError::AlreadyInitialized(config.data_dir.display().to_string()));
        }
        fs::create_dir_all(&config.data_dir)?;

        let keystore = KeyStore::init(
            &keystore_dir,
            options.name,
            options.keystore_passphrase,
            config.keystore_settings(),
            clock.clone(),
        )?;
        keystore.lock();
        SoftwareVault::create(
            config.vault_dir(),
            options.name,
            options.vault_passphrase,
            config.vault_settings(),
            clock.clone(),
        )?;

        let rbac = RoleManager::new(clock, config.rbac_settings(), audit_sinks(config)?)?;
        rbac.bootstrap_master(options.admin_user)?;
        rbac.set_credential(options.admin_user, options.admin_password)?;
        info!(
            data_dir = %config.data_dir.display(),
            admin = options.admin_user,
            "custody directory initialized"
        );
        Ok(())
    }

    /// Open an initialized custody directory. The keystore and vault start
    /// locked. Hardware devices are reached through `transport`.
    pub fn open(
        config: KeyguardConfig,
        clock: SharedClock,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<Self, NodeError> {
        let keystore_dir = config.keystore_dir();
        if KeyStore::probe(&keystore_dir) == StoreStatus::Uninitialized {
            return Err(NodeError::NotInitialized(config.data_dir.display().to_string()));
        }

        let keystore = Arc::new(KeyStore::open(
            &keystore_dir,
            config.keystore_settings(),
            clock.clone(),
        )?);
        let vault = SoftwareVault::open(config.vault_dir(), config.vault_settings(), clock.clone())?;

        let signers: Vec<Arc<dyn HardwareSigner>> = vec![
            Arc::new(LedgerSigner::new(transport.clone())),
            Arc::new(TrezorSigner::new(transport.clone())),
            Arc::new(KeepKeySigner::new(transport)),
        ];
        let hardware = HardwareManager::new(config.hardware_settings(), clock.clone(), signers);

        let backend: Arc<dyn KeyBackend> = keystore.clone();
        let rotation = KeyRotationManager::new(backend, clock.clone(), config.rotation_settings())?;
        let multisig = Arc::new(MultisigManager::new(clock.clone(), config.multisig_settings())?);
        let rbac = RoleManager::new(clock, config.rbac_settings(), audit_sinks(&config)?)?;

        info!(data_dir = %config.data_dir.display(), "custody context opened");
        Ok(Self {
            config,
            keystore,
            vault,
            hardware,
            rotation,
            multisig,
            rbac,
        })
    }

    pub fn config(&self) -> &KeyguardConfig {
        &self.config
    }

    // Raw component handles stay inside the crate: outside callers go
    // through the session-gated operations below.

    pub(crate) fn hardware(&self) -> &HardwareManager {
        &self.hardware
    }

    pub(crate) fn rotation(&self) -> &KeyRotationManager {
        &self.rotation
    }

    pub(crate) fn multisig(&self) -> &Arc<MultisigManager> {
        &self.multisig
    }

    pub(crate) fn rbac(&self) -> &RoleManager {
        &self.rbac
    }

    pub(crate) fn vault(&self) -> &SoftwareVault {
        &self.vault
    }

    pub fn status(&self) -> CustodyStatus {
        CustodyStatus {
            keystore: self.keystore.status(),
            vault: self.vault.status(),
            hardware: self.hardware.status(),
            rotation: self.rotation.summary(),
            multisig: self.multisig.status(),
            rbac: self.rbac.status(),
        }
    }

    fn gate(&self, session_id: &str, permission: Permission, resource: &str) -> Result<Session, NodeError> {
        Ok(self.rbac.authorize_on(session_id, permission, resource)?)
    }

    // ── Sessions and roles ─────────────────────────────────────────────

    pub fn login(
        &self,
        user: &str,
        password: &str,
        role: Role,
        client: &ClientInfo,
    ) -> Result<Session, NodeError> {
        Ok(self.rbac.authenticate(user, password, role, client)?)
    }

    pub fn logout(&self, session_id: &str) -> Result<(), NodeError> {
        Ok(self.rbac.revoke_session(session_id, session_id, "logout")?)
    }

    pub fn assign_role(
        &self,
        session_id: &str,
        user: &str,
        role: Role,
    ) -> Result<RoleAssignment, NodeError> {
        Ok(self.rbac.assign_role(user, role, session_id, None)?)
    }

    pub fn revoke_role(
        &self,
        session_id: &str,
        user: &str,
        role: Role,
        reason: &str,
    ) -> Result<(), NodeError> {
        Ok(self.rbac.revoke_role(user, role, session_id, reason)?)
    }

    /// Set a login password. Users may change their own; setting anyone
    /// else's needs [`Permission::AssignRole`].
    pub fn set_credential(&self, session_id: &str, user: &str, password: &str) -> Result<(), NodeError> {
        let resource = format!("credential/{user}");
        let session = self.gate(session_id, Permission::ViewWalletInfo, &resource)?;
        if session.user_id != user {
            self.gate(session_id, Permission::AssignRole, &resource)?;
        }
        Ok(self.rbac.set_credential(user, password)?)
    }

    pub fn audit_log(&self, session_id: &str, query: &AuditQuery) -> Result<Vec<AuditEvent>, NodeError> {
        Ok(self.rbac.get_audit_log(session_id, query)?)
    }

    /// Re-hash the audit chain. Returns the number of events checked.
    pub fn verify_audit_chain(&self, session_id: &str) -> Result<usize, NodeError> {
        self.gate(session_id, Permission::ViewAuditLog, "audit")?;
        Ok(self.rbac.verify_audit_chain()?)
    }

    // ── Keystore ───────────────────────────────────────────────────────

    /// Unlock the keystore. The passphrase is the real credential here; the
    /// session only has to be allowed to sign.
    pub fn unlock_keystore(&self, session_id: &str, passphrase: &str) -> Result<(), NodeError> {
        self.gate(session_id, Permission::SignTransaction, "keystore")?;
        Ok(self.keystore.unlock(passphrase)?)
    }

    /// Locking cuts off every signer, so it needs the same permission as
    /// unlocking.
    pub fn lock_keystore(&self, session_id: &str) -> Result<(), NodeError> {
        self.gate(session_id, Permission::SignTransaction, "keystore")?;
        self.keystore.lock();
        Ok(())
    }

    pub fn generate_key(&self, session_id: &str, spec: KeySpec) -> Result<String, NodeError> {
        self.gate(session_id, Permission::GenerateKey, "keystore")?;
        Ok(self.keystore.generate_key(spec)?)
    }

    pub fn import_key(&self, session_id: &str, spec: KeySpec, secret: &[u8]) -> Result<String, NodeError> {
        self.gate(session_id, Permission::ImportKey, "keystore")?;
        Ok(self.keystore.import_key(spec, secret)?)
    }

    /// Copy a private key out of the store. The copy is wiped on drop.
    pub fn export_key(&self, session_id: &str, key_id: &str) -> Result<SecretBytes, NodeError> {
        self.gate(session_id, Permission::ExportKey, &key_resource(key_id))?;
        Ok(self
            .keystore
            .with_private_key(key_id, |secret| SecretBytes::new(secret.to_vec()))?)
    }

    pub fn key_info(&self, session_id: &str, key_id: &str) -> Result<KeyInfo, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, &key_resource(key_id))?;
        Ok(self.keystore.get_key_info(key_id)?)
    }

    pub fn public_key(&self, session_id: &str, key_id: &str) -> Result<PublicKeyBytes, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, &key_resource(key_id))?;
        Ok(self.keystore.get_public_key(key_id)?)
    }

    pub fn list_keys(&self, session_id: &str, filter: &KeyFilter) -> Result<Vec<KeyInfo>, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, "keystore")?;
        Ok(self.keystore.list(filter)?)
    }

    pub fn sign(&self, session_id: &str, key_id: &str, data: &[u8]) -> Result<SignatureBytes, NodeError> {
        self.gate(session_id, Permission::SignTransaction, &key_resource(key_id))?;
        Ok(self.keystore.sign(key_id, data)?)
    }

    pub fn verify(
        &self,
        session_id: &str,
        key_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, &key_resource(key_id))?;
        Ok(self.keystore.verify(key_id, data, signature)?)
    }

    pub fn delete_key(&self, session_id: &str, key_id: &str, permanent: bool) -> Result<(), NodeError> {
        self.gate(session_id, Permission::DeleteKey, &key_resource(key_id))?;
        Ok(self.keystore.delete(key_id, permanent)?)
    }

    pub fn backup_keystore(&self, session_id: &str, dest: &Path) -> Result<usize, NodeError> {
        self.gate(session_id, Permission::BackupWallet, "keystore")?;
        Ok(self.keystore.backup(dest)?)
    }

    // ── Vault ──────────────────────────────────────────────────────────

    /// Unlock the vault and open a vault session for the caller. The vault
    /// level asked for must be covered by the caller's role.
    pub fn unlock_vault(
        &self,
        session_id: &str,
        passphrase: &str,
        level: VaultAccess,
    ) -> Result<String, NodeError> {
        let session = self.gate(session_id, vault_permission(level), "vault")?;
        Ok(self.vault.unlock(passphrase, &session.user_id, level)?)
    }

    /// Locking closes every vault session, so it needs what a read-write
    /// unlock needs.
    pub fn lock_vault(&self, session_id: &str) -> Result<(), NodeError> {
        self.gate(session_id, vault_permission(VaultAccess::ReadWrite), "vault")?;
        self.vault.lock();
        Ok(())
    }

    pub fn vault_generate_key(
        &self,
        session_id: &str,
        vault_session: &str,
        key_type: KeyType,
        label: Option<&str>,
    ) -> Result<VaultKeyInfo, NodeError> {
        self.gate(session_id, Permission::GenerateKey, "vault")?;
        Ok(self.vault.generate_key(vault_session, key_type, label)?)
    }

    pub fn vault_sign(
        &self,
        session_id: &str,
        vault_session: &str,
        key_id: &str,
        data: &[u8],
    ) -> Result<SignatureBytes, NodeError> {
        self.gate(session_id, Permission::SignTransaction, &vault_key_resource(key_id))?;
        Ok(self.vault.sign(vault_session, key_id, data)?)
    }

    pub fn vault_verify(
        &self,
        session_id: &str,
        vault_session: &str,
        key_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, &vault_key_resource(key_id))?;
        Ok(self.vault.verify(vault_session, key_id, data, signature)?)
    }

    pub fn vault_list_keys(&self, session_id: &str, vault_session: &str) -> Result<Vec<VaultKeyInfo>, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, "vault")?;
        Ok(self.vault.list_keys(vault_session)?)
    }

    pub fn vault_delete_key(
        &self,
        session_id: &str,
        vault_session: &str,
        key_id: &str,
    ) -> Result<bool, NodeError> {
        self.gate(session_id, Permission::DeleteKey, &vault_key_resource(key_id))?;
        Ok(self.vault.delete_key(vault_session, key_id)?)
    }

    // ── Hardware ───────────────────────────────────────────────────────

    pub async fn discover_devices(&self, session_id: &str) -> Result<Vec<DeviceInfo>, NodeError> {
        self.gate(session_id, Permission::ViewWalletInfo, "hardware")?;
        Ok(self.hardware.discover().await)
    }

    pub async fn connect_device(
        &self,
        session_id: &str,
        device_id: &str,
        family: DeviceFamily,
    ) -> Result<DeviceInfo, NodeError> {
        self.gate(session_id, Permission::ImportKey, &device_resource(device_id))?;
        Ok(self.hardware.connect(device_id, family).await?)
    }

    pub async fn disconnect_device(&self, session_id: &str, device_id: &str) -> Result<bool, NodeError> {
        self.gate(session_id, Permission::ImportKey, &device_resource(device_id))?;
        Ok(self.hardware.disconnect(device_id).await?)
    }

    pub async fn derive_device_key(
        &self,
        session_id: &str,
        device_id: &str,
        preset: DerivationPreset,
        label: Option<String>,
    ) -> Result<DerivedKey, NodeError> {
        self.gate(session_id, Permission::GenerateKey, &device_resource(device_id))?;
        Ok(self.hardware.derive_key(device_id, preset, label).await?)
    }

    pub async fn device_sign(
        &self,
        session_id: &str,
        device_id: &str,
        data: &[u8],
        key_id: Option<&str>,
        path: Option<DerivationPath>,
    ) -> Result<SignatureBytes, NodeError> {
        self.gate(session_id, Permission::SignTransaction, &device_resource(device_id))?;
        Ok(self.hardware.sign(device_id, data, key_id, path).await?)
    }

    pub async fn device_verify(
        &self,
        session_id: &str,
        device_id: &str,
        data: &[u8],
        signature: &[u8],
        key_id: Option<&str>,
    ) -> Result<bool, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, &device_resource(device_id))?;
        Ok(self.hardware.verify(device_id, data, signature, key_id, None).await?)
    }

    // ── Rotation ───────────────────────────────────────────────────────

    pub fn create_rotation_policy(&self, session_id: &str, policy: RotationPolicy) -> Result<(), NodeError> {
        let session = self.gate(
            session_id,
            Permission::RotateKey,
            &format!("rotation-policy/{}", policy.policy_id),
        )?;
        Ok(self.rotation.create_policy(policy, &session.user_id)?)
    }

    pub fn register_for_rotation(
        &self,
        session_id: &str,
        key_id: &str,
        policy_id: Option<&str>,
    ) -> Result<(), NodeError> {
        self.gate(session_id, Permission::RotateKey, &key_resource(key_id))?;
        self.rotation.register_key(key_id, policy_id)?;
        Ok(())
    }

    pub fn assign_rotation_policy(&self, session_id: &str, key_id: &str, policy_id: &str) -> Result<(), NodeError> {
        let session = self.gate(session_id, Permission::RotateKey, &key_resource(key_id))?;
        Ok(self.rotation.assign_policy(key_id, policy_id, &session.user_id)?)
    }

    /// Start a rotation of a managed key. Returns the task id.
    pub fn rotate_key(
        &self,
        session_id: &str,
        key_id: &str,
        trigger: RotationTrigger,
        approvers: &[String],
    ) -> Result<String, NodeError> {
        let session = self.gate(session_id, Permission::RotateKey, &key_resource(key_id))?;
        Ok(self.rotation.rotate(key_id, trigger, &session.user_id, approvers)?)
    }

    /// Approve a pending rotation as the session's user.
    pub fn approve_rotation(&self, session_id: &str, task_id: &str) -> Result<TaskStatus, NodeError> {
        let session = self.gate(session_id, Permission::RotateKey, &format!("rotation/{task_id}"))?;
        Ok(self.rotation.approve(task_id, &session.user_id)?)
    }

    pub fn cancel_rotation(&self, session_id: &str, task_id: &str, reason: &str) -> Result<(), NodeError> {
        let session = self.gate(session_id, Permission::RotateKey, &format!("rotation/{task_id}"))?;
        Ok(self.rotation.cancel(task_id, &session.user_id, reason)?)
    }

    pub fn rollback_rotation(&self, session_id: &str, task_id: &str, reason: &str) -> Result<(), NodeError> {
        let session = self.gate(session_id, Permission::RotateKey, &format!("rotation/{task_id}"))?;
        Ok(self.rotation.rollback(task_id, &session.user_id, reason)?)
    }

    pub fn rotation_status(&self, session_id: &str, key_id: &str) -> Result<KeyRotationStatus, NodeError> {
        self.gate(session_id, Permission::ViewKeyInfo, &key_resource(key_id))?;
        Ok(self.rotation.status(key_id)?)
    }

    // ── Multisig ───────────────────────────────────────────────────────

    pub fn create_multisig_wallet(
        &self,
        session_id: &str,
        name: &str,
        scheme: AuthorizationScheme,
        signers: Vec<SignerSpec>,
        threshold: u32,
    ) -> Result<String, NodeError> {
        let session = self.gate(session_id, Permission::CreateMultisig, "multisig")?;
        Ok(self
            .multisig
            .create_wallet(name, "", scheme, signers, threshold, &session.user_id)?)
    }

    pub fn add_multisig_signer(&self, session_id: &str, wallet_id: &str, spec: SignerSpec) -> Result<(), NodeError> {
        let session = self.gate(session_id, Permission::ManageMultisig, &wallet_resource(wallet_id))?;
        Ok(self.multisig.add_signer(wallet_id, spec, &session.user_id)?)
    }

    pub fn remove_multisig_signer(&self, session_id: &str, wallet_id: &str, signer_id: &str) -> Result<(), NodeError> {
        let session = self.gate(session_id, Permission::ManageMultisig, &wallet_resource(wallet_id))?;
        Ok(self.multisig.remove_signer(wallet_id, signer_id, &session.user_id)?)
    }

    pub fn multisig_wallet(&self, session_id: &str, wallet_id: &str) -> Result<WalletInfo, NodeError> {
        self.gate(session_id, Permission::ViewWalletInfo, &wallet_resource(wallet_id))?;
        Ok(self.multisig.wallet_info(wallet_id)?)
    }

    pub fn create_multisig_transaction(
        &self,
        session_id: &str,
        wallet_id: &str,
        tx_type: TransactionType,
        payload: Vec<u8>,
        description: &str,
        ttl_secs: Option<u64>,
    ) -> Result<String, NodeError> {
        let session = self.gate(session_id, Permission::SendTransaction, &wallet_resource(wallet_id))?;
        Ok(self.multisig.create_transaction(
            wallet_id,
            tx_type,
            payload,
            description,
            &session.user_id,
            ttl_secs,
        )?)
    }

    pub fn submit_multisig_signature(
        &self,
        session_id: &str,
        tx_id: &str,
        signer_id: &str,
        signature: SignatureBytes,
        public_key: &PublicKeyBytes,
    ) -> Result<TransactionStatus, NodeError> {
        self.gate(session_id, Permission::SignMultisig, &tx_resource(tx_id))?;
        Ok(self
            .multisig
            .submit_signature(tx_id, signer_id, signature, public_key)?)
    }

    /// Sign a transaction's payload with a keystore key and submit the
    /// signature for `signer_id`.
    pub fn sign_multisig_with_key(
        &self,
        session_id: &str,
        tx_id: &str,
        signer_id: &str,
        key_id: &str,
    ) -> Result<TransactionStatus, NodeError> {
        self.gate(session_id, Permission::SignMultisig, &tx_resource(tx_id))?;
        let payload = self.multisig.transaction(tx_id)?.payload;
        let signature = self.keystore.sign(key_id, &payload)?;
        let public_key = self.keystore.get_public_key(key_id)?;
        Ok(self
            .multisig
            .submit_signature(tx_id, signer_id, signature, &public_key)?)
    }

    /// Like [`sign_multisig_with_key`](Self::sign_multisig_with_key) with a
    /// key derived on a connected hardware device.
    pub async fn sign_multisig_with_device(
        &self,
        session_id: &str,
        tx_id: &str,
        signer_id: &str,
        device_id: &str,
        key_id: &str,
    ) -> Result<TransactionStatus, NodeError> {
        self.gate(session_id, Permission::SignMultisig, &tx_resource(tx_id))?;
        let public_key = self
            .hardware
            .derived_keys(Some(device_id))
            .into_iter()
            .find(|k| k.key_id == key_id)
            .map(|k| k.public_key)
            .ok_or_else(|| HardwareError::KeyNotFound(key_id.to_string()))?;
        let payload = self.multisig.transaction(tx_id)?.payload;
        let signature = self.hardware.sign(device_id, &payload, Some(key_id), None).await?;
        Ok(self
            .multisig
            .submit_signature(tx_id, signer_id, signature, &public_key)?)
    }

    pub fn cancel_multisig_transaction(&self, session_id: &str, tx_id: &str, reason: &str) -> Result<(), NodeError> {
        let session = self.gate(session_id, Permission::ManageMultisig, &tx_resource(tx_id))?;
        Ok(self
            .multisig
            .cancel_transaction(tx_id, &session.user_id, reason)?)
    }

    pub fn multisig_status(&self, session_id: &str, tx_id: &str) -> Result<TransactionInfo, NodeError> {
        self.gate(session_id, Permission::ViewTransactionHistory, &tx_resource(tx_id))?;
        Ok(self.multisig.get_status(tx_id)?)
    }

    pub fn multisig_authorization(&self, session_id: &str, tx_id: &str) -> Result<Option<Authorization>, NodeError> {
        self.gate(session_id, Permission::ViewTransactionHistory, &tx_resource(tx_id))?;
        Ok(self.multisig.authorization(tx_id)?)
    }

    /// Wipe in-memory secrets. Used on shutdown.
    pub async fn seal(&self) {
        self.multisig.shutdown().await;
        self.hardware.disconnect_all().await;
        self.vault.lock();
        self.keystore.lock();
        info!("custody context sealed");
    }
}

fn audit_sinks(config: &KeyguardConfig) -> Result<Vec<Arc<dyn AuditSink>>, NodeError> {
    fs::create_dir_all(&config.data_dir)?;
    Ok(vec![
        Arc::new(TracingAuditSink),
        Arc::new(JsonLinesAuditSink::open(&config.audit_log_path())?),
    ])
}

/// The role permission a vault session of `level` needs.
fn vault_permission(level: VaultAccess) -> Permission {
    match level {
        VaultAccess::ReadOnly => Permission::ViewKeyInfo,
        VaultAccess::ReadWrite => Permission::SignTransaction,
        VaultAccess::Admin => Permission::DeleteKey,
        VaultAccess::Master => Permission::EmergencyRecovery,
    }
}

fn key_resource(key_id: &str) -> String {
    format!("key/{key_id}")
}

fn vault_key_resource(key_id: &str) -> String {
    format!("vault-key/{key_id}")
}

fn device_resource(device_id: &str) -> String {
    format!("device/{device_id}")
}

fn wallet_resource(wallet_id: &str) -> String {
    format!("multisig-wallet/{wallet_id}")
}

fn tx_resource(tx_id: &str) -> String {
    format!("multisig-tx/{tx_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_levels_map_to_rising_permissions() {
        assert_eq!(vault_permission(VaultAccess::ReadOnly), Permission::ViewKeyInfo);
        assert_eq!(vault_permission(VaultAccess::Master), Permission::EmergencyRecovery);
    }
}
