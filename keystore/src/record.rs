//! Persisted key records and the views handed back to callers.

use std::collections::BTreeSet;

use keyguard_types::{KeyStatus, KeyType, KeyUsage, PublicKeyBytes, Timestamp};
use serde::{Deserialize, Serialize};

/// A key as stored in `keys/<key_id>.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredKey {
    pub key_id: String,
    pub key_type: KeyType,
    pub usage: KeyUsage,
    pub status: KeyStatus,
    pub public_key: PublicKeyBytes,
    /// `nonce ‖ tag ‖ ciphertext` under the store master key.
    #[serde(with = "keyguard_types::serde_hex")]
    pub encrypted_private_key: Vec<u8>,
    pub version: u32,
    pub created_at: Timestamp,
    pub last_used: Option<Timestamp>,
    pub usage_count: u64,
    pub max_usage: Option<u64>,
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub predecessor: Option<String>,
    #[serde(default)]
    pub successor: Option<String>,
}

impl StoredKey {
    /// Apply the on-access transitions: past expiry becomes `Expired`, an
    /// exhausted usage budget becomes `Inactive`. Returns whether the status
    /// changed.
    pub(crate) fn refresh_status(&mut self, now: Timestamp) -> bool {
        if self.status != KeyStatus::Active {
            return false;
        }
        if self.expires_at.is_some_and(|at| now >= at) {
            self.status = KeyStatus::Expired;
            return true;
        }
        if self.max_usage.is_some_and(|max| self.usage_count >= max) {
            self.status = KeyStatus::Inactive;
            return true;
        }
        false
    }

    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            key_id: self.key_id.clone(),
            key_type: self.key_type,
            usage: self.usage,
            status: self.status,
            public_key: self.public_key.clone(),
            version: self.version,
            created_at: self.created_at,
            last_used: self.last_used,
            usage_count: self.usage_count,
            max_usage: self.max_usage,
            expires_at: self.expires_at,
            tags: self.tags.clone(),
            predecessor: self.predecessor.clone(),
            successor: self.successor.clone(),
        }
    }
}

/// Everything about a stored key except its encrypted secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub key_type: KeyType,
    pub usage: KeyUsage,
    pub status: KeyStatus,
    pub public_key: PublicKeyBytes,
    pub version: u32,
    pub created_at: Timestamp,
    pub last_used: Option<Timestamp>,
    pub usage_count: u64,
    pub max_usage: Option<u64>,
    pub expires_at: Option<Timestamp>,
    pub tags: BTreeSet<String>,
    pub predecessor: Option<String>,
    pub successor: Option<String>,
}

/// Parameters for a new key.
#[derive(Clone, Debug)]
pub struct KeySpec {
    pub key_type: KeyType,
    pub usage: KeyUsage,
    pub expires_at: Option<Timestamp>,
    pub max_usage: Option<u64>,
    pub tags: BTreeSet<String>,
}

impl KeySpec {
    pub fn new(key_type: KeyType, usage: KeyUsage) -> Self {
        Self {
            key_type,
            usage,
            expires_at: None,
            max_usage: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn max_usage(mut self, max: u64) -> Self {
        self.max_usage = Some(max);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Listing filter. Unset fields match everything; `tags` matches a key
/// carrying any of them.
#[derive(Clone, Debug, Default)]
pub struct KeyFilter {
    pub key_type: Option<KeyType>,
    pub usage: Option<KeyUsage>,
    pub status: Option<KeyStatus>,
    pub tags: BTreeSet<String>,
}

impl KeyFilter {
    pub fn matches(&self, key: &StoredKey) -> bool {
        self.key_type.map_or(true, |t| t == key.key_type)
            && self.usage.map_or(true, |u| u == key.usage)
            && self.status.map_or(true, |s| s == key.status)
            && (self.tags.is_empty() || !self.tags.is_disjoint(&key.tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(status: KeyStatus) -> StoredKey {
        StoredKey {
            key_id: "k1".into(),
            key_type: KeyType::Ed25519,
            usage: KeyUsage::Signing,
            status,
            public_key: PublicKeyBytes(vec![1; 32]),
            encrypted_private_key: vec![0; 60],
            version: 1,
            created_at: Timestamp::new(100),
            last_used: None,
            usage_count: 0,
            max_usage: None,
            expires_at: None,
            tags: ["payments".to_string()].into_iter().collect(),
            predecessor: None,
            successor: None,
        }
    }

    #[test]
    fn expiry_wins_over_usage_budget() {
        let mut k = key(KeyStatus::Active);
        k.expires_at = Some(Timestamp::new(200));
        k.max_usage = Some(1);
        k.usage_count = 1;
        assert!(k.refresh_status(Timestamp::new(200)));
        assert_eq!(k.status, KeyStatus::Expired);
    }

    #[test]
    fn exhausted_budget_deactivates() {
        let mut k = key(KeyStatus::Active);
        k.max_usage = Some(2);
        k.usage_count = 1;
        assert!(!k.refresh_status(Timestamp::new(150)));
        k.usage_count = 2;
        assert!(k.refresh_status(Timestamp::new(150)));
        assert_eq!(k.status, KeyStatus::Inactive);
    }

    #[test]
    fn non_active_keys_are_left_alone() {
        let mut k = key(KeyStatus::Archived);
        k.expires_at = Some(Timestamp::new(1));
        assert!(!k.refresh_status(Timestamp::new(500)));
        assert_eq!(k.status, KeyStatus::Archived);
    }

    #[test]
    fn filter_matches_any_tag() {
        let k = key(KeyStatus::Active);
        let mut filter = KeyFilter::default();
        assert!(filter.matches(&k));
        filter.tags.insert("treasury".into());
        assert!(!filter.matches(&k));
        filter.tags.insert("payments".into());
        assert!(filter.matches(&k));
        filter.status = Some(KeyStatus::Expired);
        assert!(!filter.matches(&k));
    }

    #[test]
    fn encrypted_blob_serializes_as_hex() {
        let json = serde_json::to_string(&key(KeyStatus::Active)).unwrap();
        assert!(json.contains("\"status\":\"active\""));
        assert!(json.contains(&"00".repeat(60)));
    }
}
