//! Passphrase-locked operator vault with brute-force lockout and its own
//! sessions.
//!
//! ```text
//! vault.json        metadata, salt, failed-attempt counter, lockout deadline
//! canary.bin        salt ‖ nonce ‖ tag ‖ ciphertext
//! keys/<id>.json    one record per key
//! ```
//!
//! State machine: `Locked -> Unlocked` on a correct passphrase,
//! `Unlocked -> Locked` on [`SoftwareVault::lock`] or when the last session
//! times out, `Locked -> LockedOut` after too many consecutive failures,
//! `LockedOut -> Locked` once the cooldown has passed. The failure counter
//! and deadline are written on every failure, so a restart does not reset
//! them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyguard_crypto::{
    derive_key, generate_keypair, open, public_from_secret, random_salt, seal, sign, verify,
    Cipher, CryptoError, KdfParams, SALT_LEN,
};
use keyguard_types::{
    random_id, KeyStatus, KeyType, PublicKeyBytes, SharedClock, SignatureBytes, Timestamp,
};
use keyguard_utils::{format_duration, read_json, write_atomic, write_json_atomic};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::files::KeyDir;
use crate::KeystoreError;

const METADATA_FILE: &str = "vault.json";
const CANARY_FILE: &str = "canary.bin";
const CANARY_PLAINTEXT: &[u8] = b"keyguard vault canary v1";
const FORMAT_VERSION: u32 = 1;
const CIPHER: Cipher = Cipher::ChaCha20Poly1305;

/// Vault session rank. Each level includes everything below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
    Admin,
    Master,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Locked,
    Unlocked,
    LockedOut,
    Corrupted,
}

#[derive(Clone, Debug)]
pub struct VaultSettings {
    pub kdf: KdfParams,
    pub max_failed_attempts: u32,
    pub lockout_secs: u64,
    pub session_timeout_secs: u64,
    /// Recorded in the metadata at creation.
    pub max_keys: usize,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            max_failed_attempts: 5,
            lockout_secs: 30 * 60,
            session_timeout_secs: 60 * 60,
            max_keys: 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub vault_id: String,
    pub name: String,
    pub version: u32,
    pub created_at: Timestamp,
    pub last_accessed: Option<Timestamp>,
    pub key_count: usize,
    pub max_keys: usize,
    pub kdf: KdfParams,
    #[serde(with = "keyguard_types::serde_hex")]
    pub salt: Vec<u8>,
    pub failed_attempts: u32,
    pub locked_until: Option<Timestamp>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct VaultKey {
    key_id: String,
    key_type: KeyType,
    label: Option<String>,
    public_key: PublicKeyBytes,
    #[serde(with = "keyguard_types::serde_hex")]
    encrypted_private_key: Vec<u8>,
    created_at: Timestamp,
    last_used: Option<Timestamp>,
    usage_count: u64,
    active: bool,
}

impl VaultKey {
    fn info(&self) -> VaultKeyInfo {
        VaultKeyInfo {
            key_id: self.key_id.clone(),
            key_type: self.key_type,
            label: self.label.clone(),
            public_key: self.public_key.clone(),
            created_at: self.created_at,
            last_used: self.last_used,
            usage_count: self.usage_count,
            active: self.active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VaultKeyInfo {
    pub key_id: String,
    pub key_type: KeyType,
    pub label: Option<String>,
    pub public_key: PublicKeyBytes,
    pub created_at: Timestamp,
    pub last_used: Option<Timestamp>,
    pub usage_count: u64,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct VaultSession {
    pub session_id: String,
    pub user_id: String,
    pub access_level: AccessLevel,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub last_activity: Timestamp,
}

#[derive(Clone, Debug, Serialize)]
pub struct VaultSummary {
    pub vault_id: String,
    pub name: String,
    pub status: VaultStatus,
    pub key_count: usize,
    pub max_keys: usize,
    pub failed_attempts: u32,
    pub locked_until: Option<Timestamp>,
    pub active_sessions: usize,
}

struct VaultState {
    meta: VaultMetadata,
    status: VaultStatus,
    master: Option<Zeroizing<[u8; 32]>>,
    sessions: HashMap<String, VaultSession>,
}

type KeySlot = Arc<Mutex<VaultKey>>;

pub struct SoftwareVault {
    root: PathBuf,
    settings: VaultSettings,
    clock: SharedClock,
    files: KeyDir,
    state: RwLock<VaultState>,
    keys: RwLock<HashMap<String, KeySlot>>,
}

impl SoftwareVault {
    /// Create a vault in `root`. It starts locked.
    pub fn create(
        root: impl Into<PathBuf>,
        name: &str,
        passphrase: &str,
        settings: VaultSettings,
        clock: SharedClock,
    ) -> Result<Self, KeystoreError> {
        let root = root.into();
        let meta_path = root.join(METADATA_FILE);
        if meta_path.exists() {
            return Err(KeystoreError::AlreadyInitialized(root.display().to_string()));
        }
        let files = KeyDir::new(&root);
        files.create()?;

        let salt = random_salt();
        let master = derive_key(passphrase.as_bytes(), &salt, &settings.kdf)?;
        let mut canary = salt.to_vec();
        canary.extend_from_slice(&seal(CIPHER, &master, CANARY_PLAINTEXT)?);
        write_atomic(&root.join(CANARY_FILE), &canary)?;

        let meta = VaultMetadata {
            vault_id: random_id(),
            name: name.to_string(),
            version: FORMAT_VERSION,
            created_at: clock.now(),
            last_accessed: None,
            key_count: 0,
            max_keys: settings.max_keys,
            kdf: settings.kdf,
            salt: salt.to_vec(),
            failed_attempts: 0,
            locked_until: None,
        };
        write_json_atomic(&meta_path, &meta)?;
        info!(vault = %meta.vault_id, name, "vault created");

        Ok(Self::from_parts(root, files, settings, clock, meta, VaultStatus::Locked))
    }

    /// Load an existing vault. A lockout still in force is honoured.
    pub fn open(
        root: impl Into<PathBuf>,
        settings: VaultSettings,
        clock: SharedClock,
    ) -> Result<Self, KeystoreError> {
        let root = root.into();
        let meta: VaultMetadata =
            read_json(&root.join(METADATA_FILE)).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => KeystoreError::NotInitialized(root.display().to_string()),
                io::ErrorKind::InvalidData => KeystoreError::Corrupted(format!("metadata: {e}")),
                _ => KeystoreError::Io(e),
            })?;
        let status = match meta.locked_until {
            Some(until) if clock.now() < until => VaultStatus::LockedOut,
            _ => VaultStatus::Locked,
        };
        debug!(vault = %meta.vault_id, ?status, "vault opened");
        let files = KeyDir::new(&root);
        Ok(Self::from_parts(root, files, settings, clock, meta, status))
    }

    fn from_parts(
        root: PathBuf,
        files: KeyDir,
        settings: VaultSettings,
        clock: SharedClock,
        meta: VaultMetadata,
        status: VaultStatus,
    ) -> Self {
        Self {
            root,
            settings,
            clock,
            files,
            state: RwLock::new(VaultState {
                meta,
                status,
                master: None,
                sessions: HashMap::new(),
            }),
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check the passphrase and open a session for `user_id`.
    pub fn unlock(
        &self,
        passphrase: &str,
        user_id: &str,
        access_level: AccessLevel,
    ) -> Result<String, KeystoreError> {
        let now = self.clock.now();
        let (salt, kdf) = {
            let mut state = self.state.write();
            if state.status == VaultStatus::Corrupted {
                return Err(KeystoreError::Corrupted("vault needs operator attention".into()));
            }
            if let Some(until) = state.meta.locked_until {
                if now < until {
                    state.status = VaultStatus::LockedOut;
                    return Err(KeystoreError::LockedOut {
                        retry_after_secs: until.secs_until(now),
                    });
                }
                let mut meta = state.meta.clone();
                meta.locked_until = None;
                meta.failed_attempts = 0;
                write_json_atomic(&self.root.join(METADATA_FILE), &meta)?;
                state.meta = meta;
                if state.status == VaultStatus::LockedOut {
                    state.status = VaultStatus::Locked;
                }
                info!("vault lockout elapsed");
            }
            (state.meta.salt.clone(), state.meta.kdf)
        };

        let canary = match fs::read(self.root.join(CANARY_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.mark_corrupted("canary file missing"))
            }
            Err(e) => return Err(e.into()),
        };
        if canary.len() < SALT_LEN || canary[..SALT_LEN] != salt[..] {
            return Err(self.mark_corrupted("canary salt does not match metadata"));
        }

        let master = derive_key(passphrase.as_bytes(), &salt, &kdf)?;
        match open(CIPHER, &master, &canary[SALT_LEN..]) {
            Ok(plain) if plain.as_slice() == CANARY_PLAINTEXT => {}
            Ok(_) => return Err(self.mark_corrupted("canary plaintext mismatch")),
            Err(_) => return Err(self.record_failure(now)),
        }

        let records: Vec<VaultKey> = match self.files.load_all() {
            Ok(records) => records,
            Err(KeystoreError::Corrupted(reason)) => return Err(self.mark_corrupted(&reason)),
            Err(e) => return Err(e),
        };
        let key_count = records.len();
        *self.keys.write() = records
            .into_iter()
            .map(|k| (k.key_id.clone(), Arc::new(Mutex::new(k))))
            .collect();

        let session = self.new_session(user_id, access_level, now);
        let session_id = session.session_id.clone();
        {
            let mut state = self.state.write();
            let mut meta = state.meta.clone();
            meta.failed_attempts = 0;
            meta.locked_until = None;
            meta.last_accessed = Some(now);
            meta.key_count = key_count;
            write_json_atomic(&self.root.join(METADATA_FILE), &meta)?;
            state.meta = meta;
            state.master = Some(master);
            state.status = VaultStatus::Unlocked;
            state.sessions.insert(session_id.clone(), session);
        }
        info!(user = user_id, level = ?access_level, "vault unlocked");
        Ok(session_id)
    }

    /// Wipe the master key and end every session. Locking a locked vault
    /// does nothing.
    pub fn lock(&self) {
        let was_unlocked = {
            let mut state = self.state.write();
            state.sessions.clear();
            let was_unlocked = state.master.take().is_some();
            if state.status == VaultStatus::Unlocked {
                state.status = VaultStatus::Locked;
            }
            was_unlocked
        };
        self.keys.write().clear();
        if was_unlocked {
            info!("vault locked");
        }
    }

    /// Open an additional session from an admin session. The new session
    /// cannot outrank its parent.
    pub fn open_session(
        &self,
        parent_session: &str,
        user_id: &str,
        access_level: AccessLevel,
    ) -> Result<String, KeystoreError> {
        let parent = self.session(parent_session, AccessLevel::Admin)?;
        if access_level > parent.access_level {
            return Err(KeystoreError::PermissionDenied {
                required: access_level,
            });
        }
        let session = self.new_session(user_id, access_level, self.clock.now());
        let session_id = session.session_id.clone();
        self.state.write().sessions.insert(session_id.clone(), session);
        debug!(user = user_id, level = ?access_level, "vault session opened");
        Ok(session_id)
    }

    /// End a session. Closing an unknown session is not an error.
    pub fn close_session(&self, session_id: &str) -> bool {
        self.state.write().sessions.remove(session_id).is_some()
    }

    /// Drop expired sessions. When the last session times out the vault
    /// locks itself. Returns how many sessions were dropped.
    pub fn sweep_sessions(&self) -> usize {
        let now = self.clock.now();
        let (removed, idle) = {
            let mut state = self.state.write();
            let before = state.sessions.len();
            state.sessions.retain(|_, s| now < s.expires_at);
            let removed = before - state.sessions.len();
            let idle = removed > 0
                && state.sessions.is_empty()
                && state.status == VaultStatus::Unlocked;
            (removed, idle)
        };
        if removed > 0 {
            debug!(removed, "expired vault sessions dropped");
        }
        if idle {
            self.lock();
        }
        removed
    }

    pub fn generate_key(
        &self,
        session_id: &str,
        key_type: KeyType,
        label: Option<&str>,
    ) -> Result<VaultKeyInfo, KeystoreError> {
        self.session(session_id, AccessLevel::ReadWrite)?;
        let (public, secret) = generate_keypair(key_type)?;
        let key = self.insert_key(key_type, public, secret.as_bytes(), label)?;
        info!(key_id = %key.key_id, %key_type, "vault key generated");
        Ok(key)
    }

    pub fn import_key(
        &self,
        session_id: &str,
        key_type: KeyType,
        secret: &[u8],
        label: Option<&str>,
    ) -> Result<VaultKeyInfo, KeystoreError> {
        self.session(session_id, AccessLevel::ReadWrite)?;
        let public = public_from_secret(key_type, secret)?;
        let key = self.insert_key(key_type, public, secret, label)?;
        info!(key_id = %key.key_id, %key_type, "vault key imported");
        Ok(key)
    }

    pub fn get_public_key(
        &self,
        session_id: &str,
        key_id: &str,
    ) -> Result<PublicKeyBytes, KeystoreError> {
        self.session(session_id, AccessLevel::ReadOnly)?;
        let slot = self.slot(key_id)?;
        let public = slot.lock().public_key.clone();
        Ok(public)
    }

    pub fn sign(
        &self,
        session_id: &str,
        key_id: &str,
        data: &[u8],
    ) -> Result<SignatureBytes, KeystoreError> {
        self.session(session_id, AccessLevel::ReadWrite)?;
        let slot = self.slot(key_id)?;
        let mut key = slot.lock();
        if !key.active {
            return Err(KeystoreError::KeyInactiveOrExpired {
                key_id: key_id.to_string(),
                status: KeyStatus::Inactive,
            });
        }

        let secret = self.with_master(|master| {
            open(CIPHER, master, &key.encrypted_private_key).map_err(|e| match e {
                CryptoError::Decryption | CryptoError::Malformed(_) => {
                    KeystoreError::Corrupted(format!("vault key {key_id} does not decrypt"))
                }
                other => other.into(),
            })
        })?;
        let signature = sign(key.key_type, secret.as_slice(), data)?;

        let mut used = key.clone();
        used.usage_count += 1;
        used.last_used = Some(self.clock.now());
        self.files.save(key_id, &used)?;
        *key = used;
        debug!(key_id, len = data.len(), "vault signed");
        Ok(signature)
    }

    pub fn verify(
        &self,
        session_id: &str,
        key_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, KeystoreError> {
        self.session(session_id, AccessLevel::ReadOnly)?;
        let slot = self.slot(key_id)?;
        let (key_type, public) = {
            let key = slot.lock();
            (key.key_type, key.public_key.clone())
        };
        Ok(verify(key_type, public.as_bytes(), data, signature)?)
    }

    /// Keys in creation order.
    pub fn list_keys(&self, session_id: &str) -> Result<Vec<VaultKeyInfo>, KeystoreError> {
        self.session(session_id, AccessLevel::ReadOnly)?;
        let slots: Vec<KeySlot> = self.keys.read().values().cloned().collect();
        let mut out: Vec<VaultKeyInfo> = slots.iter().map(|s| s.lock().info()).collect();
        out.sort_by(|a, b| (a.created_at, &a.key_id).cmp(&(b.created_at, &b.key_id)));
        Ok(out)
    }

    /// Remove a key and its file. Returns false if there was no such key.
    pub fn delete_key(&self, session_id: &str, key_id: &str) -> Result<bool, KeystoreError> {
        self.session(session_id, AccessLevel::Admin)?;
        let slot = match self.keys.read().get(key_id).cloned() {
            Some(slot) => slot,
            None => return Ok(false),
        };
        let _key = slot.lock();
        self.files.remove(key_id)?;
        let count = {
            let mut keys = self.keys.write();
            keys.remove(key_id);
            keys.len()
        };
        self.update_meta(|m| m.key_count = count)?;
        info!(key_id, "vault key deleted");
        Ok(true)
    }

    pub fn status(&self) -> VaultSummary {
        let now = self.clock.now();
        let state = self.state.read();
        let status = match (state.status, state.meta.locked_until) {
            (VaultStatus::LockedOut, Some(until)) if now >= until => VaultStatus::Locked,
            (status, _) => status,
        };
        VaultSummary {
            vault_id: state.meta.vault_id.clone(),
            name: state.meta.name.clone(),
            status,
            key_count: state.meta.key_count,
            max_keys: state.meta.max_keys,
            failed_attempts: state.meta.failed_attempts,
            locked_until: state.meta.locked_until,
            active_sessions: state.sessions.len(),
        }
    }

    fn new_session(&self, user_id: &str, access_level: AccessLevel, now: Timestamp) -> VaultSession {
        VaultSession {
            session_id: random_id(),
            user_id: user_id.to_string(),
            access_level,
            created_at: now,
            expires_at: now.plus_secs(self.settings.session_timeout_secs),
            last_activity: now,
        }
    }

    /// Resolve a live session holding at least `required`.
    fn session(&self, session_id: &str, required: AccessLevel) -> Result<VaultSession, KeystoreError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        match state.status {
            VaultStatus::Unlocked => {}
            VaultStatus::Corrupted => {
                return Err(KeystoreError::Corrupted("vault needs operator attention".into()))
            }
            VaultStatus::Locked | VaultStatus::LockedOut => return Err(KeystoreError::StoreLocked),
        }
        let expired = match state.sessions.get(session_id) {
            Some(s) => now >= s.expires_at,
            None => return Err(KeystoreError::SessionNotFound(session_id.to_string())),
        };
        if expired {
            state.sessions.remove(session_id);
            return Err(KeystoreError::SessionExpired(session_id.to_string()));
        }
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| KeystoreError::SessionNotFound(session_id.to_string()))?;
        if session.access_level < required {
            return Err(KeystoreError::PermissionDenied { required });
        }
        session.last_activity = now;
        Ok(session.clone())
    }

    fn insert_key(
        &self,
        key_type: KeyType,
        public_key: PublicKeyBytes,
        secret: &[u8],
        label: Option<&str>,
    ) -> Result<VaultKeyInfo, KeystoreError> {
        let encrypted = self.with_master(|master| Ok(seal(CIPHER, master, secret)?))?;
        let max_keys = self.state.read().meta.max_keys;
        let key = VaultKey {
            key_id: random_id(),
            key_type,
            label: label.map(str::to_string),
            public_key,
            encrypted_private_key: encrypted,
            created_at: self.clock.now(),
            last_used: None,
            usage_count: 0,
            active: true,
        };

        let count = {
            let mut keys = self.keys.write();
            if keys.len() >= max_keys {
                return Err(KeystoreError::PolicyViolation(format!(
                    "vault holds the maximum of {max_keys} keys"
                )));
            }
            self.files.save(&key.key_id, &key)?;
            keys.insert(key.key_id.clone(), Arc::new(Mutex::new(key.clone())));
            keys.len()
        };
        self.update_meta(|m| m.key_count = count)?;
        Ok(key.info())
    }

    /// Count a failed unlock, locking the vault out once the budget is spent.
    fn record_failure(&self, now: Timestamp) -> KeystoreError {
        let lockout = self.settings.lockout_secs;
        let (err, locked_out) = {
            let mut state = self.state.write();
            state.meta.failed_attempts += 1;
            let attempts = state.meta.failed_attempts;
            let locked_out = attempts >= self.settings.max_failed_attempts;
            if locked_out {
                state.meta.locked_until = Some(now.plus_secs(lockout));
                state.status = VaultStatus::LockedOut;
                state.master = None;
                state.sessions.clear();
                warn!(attempts, lockout = %format_duration(lockout), "vault locked out");
            } else {
                warn!(attempts, "vault unlock rejected");
            }
            let err = match write_json_atomic(&self.root.join(METADATA_FILE), &state.meta) {
                Err(e) => KeystoreError::Io(e),
                Ok(()) if locked_out => KeystoreError::LockedOut {
                    retry_after_secs: lockout,
                },
                Ok(()) => KeystoreError::WrongPassphrase,
            };
            (err, locked_out)
        };
        if locked_out {
            self.keys.write().clear();
        }
        err
    }

    fn slot(&self, key_id: &str) -> Result<KeySlot, KeystoreError> {
        self.keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeystoreError::KeyNotFound(key_id.to_string()))
    }

    fn with_master<R>(
        &self,
        f: impl FnOnce(&[u8; 32]) -> Result<R, KeystoreError>,
    ) -> Result<R, KeystoreError> {
        let state = self.state.read();
        match &state.master {
            Some(master) if state.status == VaultStatus::Unlocked => f(&**master),
            _ => Err(KeystoreError::StoreLocked),
        }
    }

    fn update_meta(&self, f: impl FnOnce(&mut VaultMetadata)) -> Result<(), KeystoreError> {
        let mut state = self.state.write();
        let mut meta = state.meta.clone();
        f(&mut meta);
        write_json_atomic(&self.root.join(METADATA_FILE), &meta)?;
        state.meta = meta;
        Ok(())
    }

    fn mark_corrupted(&self, reason: &str) -> KeystoreError {
        {
            let mut state = self.state.write();
            state.status = VaultStatus::Corrupted;
            state.master = None;
            state.sessions.clear();
        }
        self.keys.write().clear();
        error!(reason, "vault marked corrupted");
        KeystoreError::Corrupted(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyguard_nullables::ManualClock;

    const PASS: &str = "Sw0rd!Fish";

    fn settings() -> VaultSettings {
        VaultSettings {
            kdf: KdfParams::light(),
            ..Default::default()
        }
    }

    fn new_vault(dir: &Path) -> (Arc<ManualClock>, SoftwareVault) {
        let (clock, shared) = ManualClock::shared(10_000);
        let vault = SoftwareVault::create(dir, "ops", PASS, settings(), shared).unwrap();
        (clock, vault)
    }

    fn reopen(dir: &Path, clock: &Arc<ManualClock>) -> SoftwareVault {
        let shared: SharedClock = clock.clone();
        SoftwareVault::open(dir, settings(), shared).unwrap()
    }

    #[test]
    fn create_unlock_sign_verify() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, vault) = new_vault(dir.path());
        assert_eq!(vault.status().status, VaultStatus::Locked);

        let session = vault.unlock(PASS, "alice", AccessLevel::Master).unwrap();
        let key = vault
            .generate_key(&session, KeyType::Ed25519, Some("hot"))
            .unwrap();
        let sig = vault.sign(&session, &key.key_id, b"hello").unwrap();
        assert!(vault
            .verify(&session, &key.key_id, b"hello", sig.as_bytes())
            .unwrap());

        let fresh = reopen(dir.path(), &clock);
        assert!(matches!(
            fresh.unlock("swordfish", "mallory", AccessLevel::ReadOnly),
            Err(KeystoreError::WrongPassphrase)
        ));
        assert_eq!(fresh.status().failed_attempts, 1);
        assert_eq!(reopen(dir.path(), &clock).status().failed_attempts, 1);
    }

    #[test]
    fn one_failure_short_of_lockout_then_success_resets() {
        let dir = tempfile::tempdir().unwrap();
        let (_, vault) = new_vault(dir.path());
        for _ in 0..4 {
            assert!(matches!(
                vault.unlock("nope", "u", AccessLevel::ReadOnly),
                Err(KeystoreError::WrongPassphrase)
            ));
        }
        assert_eq!(vault.status().failed_attempts, 4);
        vault.unlock(PASS, "u", AccessLevel::ReadOnly).unwrap();
        assert_eq!(vault.status().failed_attempts, 0);
        assert_eq!(vault.status().status, VaultStatus::Unlocked);
    }

    #[test]
    fn fifth_failure_locks_out_until_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, vault) = new_vault(dir.path());
        for _ in 0..4 {
            vault.unlock("nope", "u", AccessLevel::ReadOnly).unwrap_err();
        }
        assert!(matches!(
            vault.unlock("nope", "u", AccessLevel::ReadOnly),
            Err(KeystoreError::LockedOut { retry_after_secs: 1800 })
        ));
        assert_eq!(vault.status().status, VaultStatus::LockedOut);

        // Even the right passphrase is refused during the cooldown.
        clock.advance(100);
        assert!(matches!(
            vault.unlock(PASS, "u", AccessLevel::ReadOnly),
            Err(KeystoreError::LockedOut { retry_after_secs: 1700 })
        ));

        // The lockout survives a restart.
        let restarted = reopen(dir.path(), &clock);
        assert_eq!(restarted.status().status, VaultStatus::LockedOut);

        clock.advance(1700);
        restarted.unlock(PASS, "u", AccessLevel::ReadOnly).unwrap();
        assert_eq!(restarted.status().failed_attempts, 0);
        assert_eq!(restarted.status().locked_until, None);
    }

    #[test]
    fn access_levels_gate_operations() {
        let dir = tempfile::tempdir().unwrap();
        let (_, vault) = new_vault(dir.path());
        let admin = vault.unlock(PASS, "root", AccessLevel::Admin).unwrap();
        let writer = vault.open_session(&admin, "bob", AccessLevel::ReadWrite).unwrap();
        let reader = vault.open_session(&admin, "eve", AccessLevel::ReadOnly).unwrap();

        let key = vault.generate_key(&writer, KeyType::Secp256k1, None).unwrap();
        assert_eq!(vault.list_keys(&reader).unwrap().len(), 1);
        assert_eq!(
            vault.get_public_key(&reader, &key.key_id).unwrap(),
            key.public_key
        );
        assert!(matches!(
            vault.sign(&reader, &key.key_id, b"x"),
            Err(KeystoreError::PermissionDenied { required: AccessLevel::ReadWrite })
        ));
        assert!(matches!(
            vault.delete_key(&writer, &key.key_id),
            Err(KeystoreError::PermissionDenied { required: AccessLevel::Admin })
        ));
        assert!(matches!(
            vault.open_session(&writer, "x", AccessLevel::ReadOnly),
            Err(KeystoreError::PermissionDenied { .. })
        ));
        assert!(matches!(
            vault.open_session(&admin, "x", AccessLevel::Master),
            Err(KeystoreError::PermissionDenied { required: AccessLevel::Master })
        ));

        assert!(vault.delete_key(&admin, &key.key_id).unwrap());
        assert!(!vault.delete_key(&admin, &key.key_id).unwrap());
        assert_eq!(vault.status().key_count, 0);
    }

    #[test]
    fn expired_sessions_are_swept_and_vault_relocks() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, vault) = new_vault(dir.path());
        let session = vault.unlock(PASS, "u", AccessLevel::ReadWrite).unwrap();
        clock.advance(3_599);
        assert_eq!(vault.sweep_sessions(), 0);
        vault.list_keys(&session).unwrap();

        clock.advance(1);
        assert!(matches!(
            vault.list_keys(&session),
            Err(KeystoreError::SessionExpired(_))
        ));

        let other = vault.unlock(PASS, "u", AccessLevel::ReadWrite).unwrap();
        clock.advance(3_600);
        assert_eq!(vault.sweep_sessions(), 1);
        assert_eq!(vault.status().status, VaultStatus::Locked);
        assert!(matches!(
            vault.list_keys(&other),
            Err(KeystoreError::StoreLocked)
        ));
    }

    #[test]
    fn lock_is_idempotent_and_ends_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (_, vault) = new_vault(dir.path());
        let session = vault.unlock(PASS, "u", AccessLevel::Master).unwrap();
        vault.lock();
        vault.lock();
        assert_eq!(vault.status().active_sessions, 0);
        assert!(matches!(
            vault.generate_key(&session, KeyType::Ed25519, None),
            Err(KeystoreError::StoreLocked)
        ));
        assert!(!vault.close_session(&session));
    }

    #[test]
    fn keys_survive_relock() {
        let dir = tempfile::tempdir().unwrap();
        let (_, vault) = new_vault(dir.path());
        let session = vault.unlock(PASS, "u", AccessLevel::ReadWrite).unwrap();
        let secret = [9u8; 32];
        let key = vault
            .import_key(&session, KeyType::Ed25519, &secret, Some("imported"))
            .unwrap();
        vault.lock();

        let session = vault.unlock(PASS, "u", AccessLevel::ReadWrite).unwrap();
        let keys = vault.list_keys(&session).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].label.as_deref(), Some("imported"));
        let sig = vault.sign(&session, &key.key_id, b"m").unwrap();
        assert_eq!(sig, sign(KeyType::Ed25519, &secret, b"m").unwrap());
        assert_eq!(vault.list_keys(&session).unwrap()[0].usage_count, 1);
    }

    #[test]
    fn key_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (_, shared) = ManualClock::shared(0);
        let small = VaultSettings {
            max_keys: 1,
            ..settings()
        };
        let vault = SoftwareVault::create(dir.path(), "tiny", PASS, small, shared).unwrap();
        let session = vault.unlock(PASS, "u", AccessLevel::ReadWrite).unwrap();
        vault.generate_key(&session, KeyType::Ed25519, None).unwrap();
        assert!(matches!(
            vault.generate_key(&session, KeyType::Ed25519, None),
            Err(KeystoreError::PolicyViolation(_))
        ));
    }

    #[test]
    fn canary_is_salt_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let (_, vault) = new_vault(dir.path());
        let canary = fs::read(dir.path().join(CANARY_FILE)).unwrap();
        let meta: VaultMetadata = read_json(&dir.path().join(METADATA_FILE)).unwrap();
        assert_eq!(&canary[..SALT_LEN], meta.salt.as_slice());
        assert_eq!(
            canary.len(),
            SALT_LEN + keyguard_crypto::SEALED_OVERHEAD + CANARY_PLAINTEXT.len()
        );
        drop(vault);
    }

    #[test]
    fn swapped_canary_salt_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let (_, vault) = new_vault(dir.path());
        let path = dir.path().join(CANARY_FILE);
        let mut canary = fs::read(&path).unwrap();
        canary[0] ^= 0xff;
        fs::write(&path, canary).unwrap();
        assert!(matches!(
            vault.unlock(PASS, "u", AccessLevel::ReadOnly),
            Err(KeystoreError::Corrupted(_))
        ));
        assert_eq!(vault.status().status, VaultStatus::Corrupted);
    }
}
