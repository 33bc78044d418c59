//! The durable key store.
//!
//! Layout under the store directory:
//!
//! ```text
//! keystore.json     metadata, KDF salt and parameters
//! canary.bin        known plaintext sealed under the master key
//! keys/<id>.json    one record per key
//! ```
//!
//! The master key is derived with Argon2id and lives only in memory while
//! the store is unlocked. [`KeyStore::lock`] drops it, which wipes it.
//!
//! Lock order: the key map lock is never acquired while the master state
//! lock is held, and a per-key slot is never locked while the key map lock
//! is held.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyguard_crypto::{
    blake2b_256, derive_key, generate_keypair, open, public_from_secret, random_salt, seal, sign,
    verify, Cipher, CryptoError, KdfParams,
};
use keyguard_types::{
    random_id, KeyStatus, KeyType, PublicKeyBytes, SharedClock, SignatureBytes, Timestamp,
};
use keyguard_utils::{read_json, write_atomic, write_json_atomic};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::files::KeyDir;
use crate::record::{KeyFilter, KeyInfo, KeySpec, StoredKey};
use crate::KeystoreError;

const METADATA_FILE: &str = "keystore.json";
const CANARY_FILE: &str = "canary.bin";
const CANARY_PLAINTEXT: &[u8] = b"keyguard keystore canary v1";
const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug)]
pub struct KeyStoreSettings {
    /// Only consulted by [`KeyStore::init`]; existing stores use the
    /// parameters recorded in their metadata.
    pub kdf: KdfParams,
    pub cipher: Cipher,
    pub max_keys: usize,
}

impl Default for KeyStoreSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            cipher: Cipher::Aes256Gcm,
            max_keys: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Uninitialized,
    /// Unlocked and serving requests.
    Ready,
    Locked,
    Corrupted,
}

/// Contents of `keystore.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeystoreMetadata {
    pub keystore_id: String,
    pub name: String,
    pub version: u32,
    pub created_at: Timestamp,
    pub last_accessed: Option<Timestamp>,
    pub key_count: usize,
    pub backup_count: u32,
    pub cipher: Cipher,
    pub kdf: KdfParams,
    #[serde(with = "keyguard_types::serde_hex")]
    pub salt: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct KeystoreSummary {
    pub keystore_id: String,
    pub name: String,
    pub status: StoreStatus,
    pub key_count: usize,
    pub active_keys: usize,
    pub backup_count: u32,
    pub created_at: Timestamp,
    pub last_accessed: Option<Timestamp>,
}

struct MasterState {
    meta: KeystoreMetadata,
    status: StoreStatus,
    master: Option<Zeroizing<[u8; 32]>>,
    /// Digest of the canary file as it was the last time it opened.
    canary_digest: Option<[u8; 32]>,
}

type KeySlot = Arc<Mutex<StoredKey>>;

pub struct KeyStore {
    root: PathBuf,
    settings: KeyStoreSettings,
    clock: SharedClock,
    files: KeyDir,
    state: RwLock<MasterState>,
    keys: RwLock<HashMap<String, KeySlot>>,
}

impl KeyStore {
    /// Create a new store in `root` and leave it unlocked.
    pub fn init(
        root: impl Into<PathBuf>,
        name: &str,
        password: &str,
        settings: KeyStoreSettings,
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
        let master = derive_key(password.as_bytes(), &salt, &settings.kdf)?;
        let canary = seal(settings.cipher, &master, CANARY_PLAINTEXT)?;
        write_atomic(&root.join(CANARY_FILE), &canary)?;

        let now = clock.now();
        let meta = KeystoreMetadata {
            keystore_id: random_id(),
            name: name.to_string(),
            version: FORMAT_VERSION,
            created_at: now,
            last_accessed: Some(now),
            key_count: 0,
            backup_count: 0,
            cipher: settings.cipher,
            kdf: settings.kdf,
            salt: salt.to_vec(),
        };
        // Metadata goes last: a directory without it can be initialized again.
        write_json_atomic(&meta_path, &meta)?;
        info!(keystore = %meta.keystore_id, name, "keystore initialized");

        Ok(Self {
            root,
            settings,
            clock,
            files,
            state: RwLock::new(MasterState {
                meta,
                status: StoreStatus::Ready,
                master: Some(master),
                canary_digest: Some(blake2b_256(&canary)),
            }),
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Load an existing store. It starts locked.
    pub fn open(
        root: impl Into<PathBuf>,
        settings: KeyStoreSettings,
        clock: SharedClock,
    ) -> Result<Self, KeystoreError> {
        let root = root.into();
        let meta: KeystoreMetadata =
            read_json(&root.join(METADATA_FILE)).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => KeystoreError::NotInitialized(root.display().to_string()),
                io::ErrorKind::InvalidData => KeystoreError::Corrupted(format!("metadata: {e}")),
                _ => KeystoreError::Io(e),
            })?;
        if meta.version != FORMAT_VERSION {
            return Err(KeystoreError::Corrupted(format!(
                "unsupported keystore version {}",
                meta.version
            )));
        }
        debug!(keystore = %meta.keystore_id, "keystore opened");
        Ok(Self {
            files: KeyDir::new(&root),
            root,
            settings,
            clock,
            state: RwLock::new(MasterState {
                meta,
                status: StoreStatus::Locked,
                master: None,
                canary_digest: None,
            }),
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// What [`KeyStore::open`] would find at `root`, without opening it.
    pub fn probe(root: &Path) -> StoreStatus {
        match read_json::<KeystoreMetadata>(&root.join(METADATA_FILE)) {
            Ok(meta) if meta.version == FORMAT_VERSION => StoreStatus::Locked,
            Ok(_) => StoreStatus::Corrupted,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StoreStatus::Uninitialized,
            Err(_) => StoreStatus::Corrupted,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.read().master.is_some()
    }

    /// Derive the master key and prove it against the canary.
    pub fn unlock(&self, password: &str) -> Result<(), KeystoreError> {
        let (salt, kdf, cipher, previous_digest) = {
            let state = self.state.read();
            if state.status == StoreStatus::Corrupted {
                return Err(KeystoreError::Corrupted("store needs operator attention".into()));
            }
            (
                state.meta.salt.clone(),
                state.meta.kdf,
                state.meta.cipher,
                state.canary_digest,
            )
        };

        let canary = match fs::read(self.root.join(CANARY_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.mark_corrupted("canary file missing"))
            }
            Err(e) => return Err(e.into()),
        };
        let digest = blake2b_256(&canary);
        let master = derive_key(password.as_bytes(), &salt, &kdf)?;

        match open(cipher, &master, &canary) {
            Ok(plain) if plain.as_slice() == CANARY_PLAINTEXT => {}
            Ok(_) => return Err(self.mark_corrupted("canary plaintext mismatch")),
            Err(_) if previous_digest.is_some_and(|d| d != digest) => {
                return Err(self.mark_corrupted("canary changed since it last opened"))
            }
            Err(_) => {
                warn!("keystore unlock rejected");
                return Err(KeystoreError::WrongPassphrase);
            }
        }

        let records: Vec<StoredKey> = match self.files.load_all() {
            Ok(records) => records,
            Err(KeystoreError::Corrupted(reason)) => return Err(self.mark_corrupted(&reason)),
            Err(e) => return Err(e),
        };
        let count = records.len();
        *self.keys.write() = records
            .into_iter()
            .map(|k| (k.key_id.clone(), Arc::new(Mutex::new(k))))
            .collect();

        let now = self.clock.now();
        {
            let mut state = self.state.write();
            if state.meta.key_count != count {
                warn!(recorded = state.meta.key_count, found = count, "key count out of step with key files");
            }
            state.master = Some(master);
            state.status = StoreStatus::Ready;
            state.canary_digest = Some(digest);
        }
        self.update_meta(|m| {
            m.last_accessed = Some(now);
            m.key_count = count;
        })?;
        info!(keys = count, "keystore unlocked");
        Ok(())
    }

    /// Wipe the master key and forget decrypted state. Locking a locked
    /// store does nothing.
    pub fn lock(&self) {
        let was_unlocked = {
            let mut state = self.state.write();
            let was_unlocked = state.master.take().is_some();
            if state.status == StoreStatus::Ready {
                state.status = StoreStatus::Locked;
            }
            was_unlocked
        };
        self.keys.write().clear();
        if was_unlocked {
            info!("keystore locked");
        }
    }

    pub fn generate_key(&self, spec: KeySpec) -> Result<String, KeystoreError> {
        let (public, secret) = generate_keypair(spec.key_type)?;
        let key = self.insert_new(&spec, public, secret.as_bytes(), None, 1)?;
        info!(key_id = %key.key_id, key_type = %key.key_type, usage = %key.usage, "key generated");
        Ok(key.key_id)
    }

    /// Bring existing secret material under management.
    pub fn import_key(&self, spec: KeySpec, secret: &[u8]) -> Result<String, KeystoreError> {
        let public = public_from_secret(spec.key_type, secret)?;
        let key = self.insert_new(&spec, public, secret, None, 1)?;
        info!(key_id = %key.key_id, key_type = %key.key_type, "key imported");
        Ok(key.key_id)
    }

    pub fn get_public_key(&self, key_id: &str) -> Result<PublicKeyBytes, KeystoreError> {
        let slot = self.slot(key_id)?;
        let key = slot.lock();
        Ok(key.public_key.clone())
    }

    pub fn get_key_info(&self, key_id: &str) -> Result<KeyInfo, KeystoreError> {
        let slot = self.slot(key_id)?;
        let info = slot.lock().info();
        Ok(info)
    }

    /// Run `f` over the decrypted private key. The plaintext is wiped when
    /// `f` returns. Counts as one use of the key.
    pub fn with_private_key<R>(
        &self,
        key_id: &str,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, KeystoreError> {
        self.use_secret(key_id, |_, secret| f(secret))
    }

    pub fn sign(&self, key_id: &str, data: &[u8]) -> Result<SignatureBytes, KeystoreError> {
        let signature = self.use_secret(key_id, |key_type, secret| sign(key_type, secret, data))??;
        debug!(key_id, len = data.len(), "signed");
        Ok(signature)
    }

    /// Check a signature against the key's public half. Retired keys can
    /// still verify what they signed.
    pub fn verify(
        &self,
        key_id: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, KeystoreError> {
        let slot = self.slot(key_id)?;
        let (key_type, public) = {
            let key = slot.lock();
            (key.key_type, key.public_key.clone())
        };
        Ok(verify(key_type, public.as_bytes(), data, signature)?)
    }

    /// Replace a key with a fresh one of the same type, usage and tags.
    /// The predecessor is archived and linked to its successor.
    pub fn rotate(&self, key_id: &str) -> Result<String, KeystoreError> {
        let slot = self.slot(key_id)?;
        let mut old = slot.lock();
        if matches!(old.status, KeyStatus::Archived | KeyStatus::PendingDeletion) {
            return Err(KeystoreError::KeyInactiveOrExpired {
                key_id: key_id.to_string(),
                status: old.status,
            });
        }

        let now = self.clock.now();
        let mut spec = KeySpec::new(old.key_type, old.usage);
        spec.tags = old.tags.clone();
        spec.max_usage = old.max_usage;
        spec.expires_at = old
            .expires_at
            .map(|at| now.plus_secs(at.as_secs().saturating_sub(old.created_at.as_secs())));

        let (public, secret) = generate_keypair(old.key_type)?;
        let new = self.insert_new(
            &spec,
            public,
            secret.as_bytes(),
            Some(old.key_id.clone()),
            old.version + 1,
        )?;

        let mut archived = old.clone();
        archived.status = KeyStatus::Archived;
        archived.successor = Some(new.key_id.clone());
        if let Err(e) = self.files.save(key_id, &archived) {
            error!(key_id, error = %e, "failed to archive rotated key, discarding successor");
            self.discard(&new.key_id);
            return Err(e.into());
        }
        *old = archived;

        info!(old = %key_id, new = %new.key_id, version = new.version, "key rotated");
        Ok(new.key_id)
    }

    /// Soft delete marks the key pending deletion; permanent delete removes
    /// its file.
    pub fn delete(&self, key_id: &str, permanent: bool) -> Result<(), KeystoreError> {
        let slot = self.slot(key_id)?;
        let mut key = slot.lock();
        if permanent {
            self.files.remove(key_id)?;
            let count = {
                let mut keys = self.keys.write();
                keys.remove(key_id);
                keys.len()
            };
            self.update_meta(|m| m.key_count = count)?;
            info!(key_id, "key permanently deleted");
        } else {
            let mut pending = key.clone();
            pending.status = KeyStatus::PendingDeletion;
            self.files.save(key_id, &pending)?;
            *key = pending;
            info!(key_id, "key marked for deletion");
        }
        Ok(())
    }

    /// Set a key's status, returning the previous one.
    pub fn set_status(&self, key_id: &str, status: KeyStatus) -> Result<KeyStatus, KeystoreError> {
        let slot = self.slot(key_id)?;
        let mut key = slot.lock();
        let previous = key.status;
        if previous != status {
            let mut updated = key.clone();
            updated.status = status;
            self.files.save(key_id, &updated)?;
            *key = updated;
            info!(key_id, from = %previous, to = %status, "key status changed");
        }
        Ok(previous)
    }

    /// Keys matching `filter`, oldest first.
    pub fn list(&self, filter: &KeyFilter) -> Result<Vec<KeyInfo>, KeystoreError> {
        self.ensure_unlocked()?;
        let slots: Vec<KeySlot> = self.keys.read().values().cloned().collect();
        let mut out: Vec<KeyInfo> = slots
            .iter()
            .filter_map(|slot| {
                let key = slot.lock();
                filter.matches(&key).then(|| key.info())
            })
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.key_id).cmp(&(b.created_at, &b.key_id)));
        Ok(out)
    }

    /// Copy every key file, the canary and the metadata into `dest`.
    /// Returns the number of key files copied.
    pub fn backup(&self, dest: &Path) -> Result<usize, KeystoreError> {
        if self.state.read().status == StoreStatus::Corrupted {
            return Err(KeystoreError::Corrupted("refusing to back up a corrupted store".into()));
        }
        if dest.join(METADATA_FILE).exists() {
            return Err(KeystoreError::AlreadyInitialized(dest.display().to_string()));
        }
        let dest_keys = KeyDir::new(dest);
        dest_keys.create()?;

        let mut copied = 0;
        for path in self.files.files()? {
            if let Some(name) = path.file_name() {
                fs::copy(&path, dest.join("keys").join(name))?;
                copied += 1;
            }
        }
        fs::copy(self.root.join(CANARY_FILE), dest.join(CANARY_FILE))?;

        self.update_meta(|m| m.backup_count += 1)?;
        let meta = self.state.read().meta.clone();
        write_json_atomic(&dest.join(METADATA_FILE), &meta)?;
        info!(dest = %dest.display(), keys = copied, "keystore backed up");
        Ok(copied)
    }

    pub fn status(&self) -> KeystoreSummary {
        let slots: Vec<KeySlot> = self.keys.read().values().cloned().collect();
        let active_keys = slots
            .iter()
            .filter(|slot| slot.lock().status.is_usable())
            .count();
        let state = self.state.read();
        KeystoreSummary {
            keystore_id: state.meta.keystore_id.clone(),
            name: state.meta.name.clone(),
            status: state.status,
            key_count: state.meta.key_count,
            active_keys,
            backup_count: state.meta.backup_count,
            created_at: state.meta.created_at,
            last_accessed: state.meta.last_accessed,
        }
    }

    fn use_secret<R>(
        &self,
        key_id: &str,
        f: impl FnOnce(KeyType, &[u8]) -> R,
    ) -> Result<R, KeystoreError> {
        let slot = self.slot(key_id)?;
        let mut key = slot.lock();
        let now = self.clock.now();

        if key.refresh_status(now) {
            self.files.save(key_id, &*key)?;
            warn!(key_id, status = %key.status, "key retired on access");
        }
        if !key.status.is_usable() {
            return Err(KeystoreError::KeyInactiveOrExpired {
                key_id: key_id.to_string(),
                status: key.status,
            });
        }

        let secret = self.with_master(|master, cipher| {
            open(cipher, master, &key.encrypted_private_key).map_err(|e| match e {
                CryptoError::Decryption | CryptoError::Malformed(_) => {
                    KeystoreError::Corrupted(format!("key {key_id} does not decrypt"))
                }
                other => other.into(),
            })
        })?;

        let mut used = key.clone();
        used.usage_count += 1;
        used.last_used = Some(now);
        self.files.save(key_id, &used)?;
        let key_type = used.key_type;
        *key = used;

        Ok(f(key_type, secret.as_slice()))
    }

    fn insert_new(
        &self,
        spec: &KeySpec,
        public_key: PublicKeyBytes,
        secret: &[u8],
        predecessor: Option<String>,
        version: u32,
    ) -> Result<StoredKey, KeystoreError> {
        let encrypted = self.with_master(|master, cipher| Ok(seal(cipher, master, secret)?))?;
        let record = StoredKey {
            key_id: random_id(),
            key_type: spec.key_type,
            usage: spec.usage,
            status: KeyStatus::Active,
            public_key,
            encrypted_private_key: encrypted,
            version,
            created_at: self.clock.now(),
            last_used: None,
            usage_count: 0,
            max_usage: spec.max_usage,
            expires_at: spec.expires_at,
            tags: spec.tags.clone(),
            predecessor,
            successor: None,
        };

        let count = {
            let mut keys = self.keys.write();
            if keys.len() >= self.settings.max_keys {
                return Err(KeystoreError::PolicyViolation(format!(
                    "key limit of {} reached",
                    self.settings.max_keys
                )));
            }
            self.files.save(&record.key_id, &record)?;
            keys.insert(record.key_id.clone(), Arc::new(Mutex::new(record.clone())));
            keys.len()
        };
        self.update_meta(|m| m.key_count = count)?;
        Ok(record)
    }

    /// Best-effort removal of a key that never became visible to callers.
    fn discard(&self, key_id: &str) {
        let count = {
            let mut keys = self.keys.write();
            keys.remove(key_id);
            keys.len()
        };
        if let Err(e) = self.files.remove(key_id) {
            warn!(key_id, error = %e, "failed to remove discarded key file");
        }
        if let Err(e) = self.update_meta(|m| m.key_count = count) {
            warn!(key_id, error = %e, "failed to record key count after discard");
        }
    }

    fn slot(&self, key_id: &str) -> Result<KeySlot, KeystoreError> {
        self.ensure_unlocked()?;
        self.keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeystoreError::KeyNotFound(key_id.to_string()))
    }

    fn ensure_unlocked(&self) -> Result<(), KeystoreError> {
        self.with_master(|_, _| Ok(()))
    }

    fn with_master<R>(
        &self,
        f: impl FnOnce(&[u8; 32], Cipher) -> Result<R, KeystoreError>,
    ) -> Result<R, KeystoreError> {
        let state = self.state.read();
        if state.status == StoreStatus::Corrupted {
            return Err(KeystoreError::Corrupted("store needs operator attention".into()));
        }
        match &state.master {
            Some(master) => f(&**master, state.meta.cipher),
            None => Err(KeystoreError::StoreLocked),
        }
    }

    /// Write metadata first, then publish it in memory.
    fn update_meta(&self, f: impl FnOnce(&mut KeystoreMetadata)) -> Result<(), KeystoreError> {
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
            state.status = StoreStatus::Corrupted;
            state.master = None;
        }
        self.keys.write().clear();
        error!(reason, "keystore marked corrupted");
        KeystoreError::Corrupted(reason.to_string())
    }
}
