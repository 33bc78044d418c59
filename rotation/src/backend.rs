use keyguard_keystore::{KeyStore, KeystoreError};
use keyguard_types::KeyStatus;

/// The key operations rotation needs from a store.
pub trait KeyBackend: Send + Sync {
    fn key_status(&self, key_id: &str) -> Result<KeyStatus, KeystoreError>;

    /// Create a same-shape successor and archive `key_id`. Must leave the
    /// predecessor untouched when it fails.
    fn rotate_key(&self, key_id: &str) -> Result<String, KeystoreError>;

    /// Returns the previous status.
    fn set_key_status(&self, key_id: &str, status: KeyStatus) -> Result<KeyStatus, KeystoreError>;
}

impl KeyBackend for KeyStore {
    fn key_status(&self, key_id: &str) -> Result<KeyStatus, KeystoreError> {
        Ok(self.get_key_info(key_id)?.status)
    }

    fn rotate_key(&self, key_id: &str) -> Result<String, KeystoreError> {
        self.rotate(key_id)
    }

    fn set_key_status(&self, key_id: &str, status: KeyStatus) -> Result<KeyStatus, KeystoreError> {
        self.set_status(key_id, status)
    }
}
