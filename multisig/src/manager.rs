//! Wallet registry and signature collection.
//!
//! Each transaction sits behind its own mutex so the threshold check and
//! finalization happen atomically with the signature that completes it.
//! Lock order: a transaction slot is taken before the wallet map, and no
//! slot is locked while the transaction map is held.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use keyguard_types::{random_id, PublicKeyBytes, SharedClock, SignatureBytes, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::records::RecordDir;
use crate::{
    Authorization, AuthorizationScheme, CollectedSignature, MultisigError, MultisigTransaction,
    MultisigWallet, SignerSpec, TransactionInfo, TransactionStatus, TransactionType,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct MultisigSettings {
    pub default_ttl_secs: u64,
    pub max_signers: usize,
    pub min_signers: usize,
    /// How long finished transactions are kept before [`MultisigManager::cleanup`]
    /// drops them.
    pub retention_secs: u64,
    /// Persist wallets and transactions under this directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for MultisigSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_signers: 10,
            min_signers: 2,
            retention_secs: 7 * 86_400,
            data_dir: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WalletInfo {
    pub wallet: MultisigWallet,
    pub active_signers: u32,
    pub active_weight: u32,
    pub signing_transactions: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MultisigSummary {
    pub wallets: usize,
    pub signing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub expired: usize,
    pub watchers: usize,
}

struct Records {
    wallets: RecordDir,
    transactions: RecordDir,
}

type TxSlot = Arc<Mutex<MultisigTransaction>>;

pub struct MultisigManager {
    clock: SharedClock,
    settings: MultisigSettings,
    records: Option<Records>,
    wallets: RwLock<HashMap<String, MultisigWallet>>,
    transactions: RwLock<HashMap<String, TxSlot>>,
    watchers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl MultisigManager {
    /// Build a manager, loading saved wallets and transactions when a data
    /// directory is configured. Call [`start_watchers`](Self::start_watchers)
    /// afterwards to resume expiry tracking of transactions still signing.
    pub fn new(clock: SharedClock, settings: MultisigSettings) -> Result<Self, MultisigError> {
        let mut wallets = HashMap::new();
        let mut transactions = HashMap::new();
        let records = match &settings.data_dir {
            Some(root) => {
                let records = Records {
                    wallets: RecordDir::open(root, "wallets")?,
                    transactions: RecordDir::open(root, "transactions")?,
                };
                for wallet in records.wallets.load_all::<MultisigWallet>()? {
                    wallets.insert(wallet.wallet_id.clone(), wallet);
                }
                for tx in records.transactions.load_all::<MultisigTransaction>()? {
                    transactions.insert(tx.tx_id.clone(), Arc::new(Mutex::new(tx)));
                }
                info!(
                    wallets = wallets.len(),
                    transactions = transactions.len(),
                    "multisig records loaded"
                );
                Some(records)
            }
            None => None,
        };
        Ok(Self {
            clock,
            settings,
            records,
            wallets: RwLock::new(wallets),
            transactions: RwLock::new(transactions),
            watchers: Mutex::new(HashMap::new()),
        })
    }

    pub fn create_wallet(
        &self,
        name: &str,
        description: &str,
        scheme: AuthorizationScheme,
        signers: Vec<SignerSpec>,
        threshold: u32,
        created_by: &str,
    ) -> Result<String, MultisigError> {
        self.check_signer_count(signers.len())?;
        if threshold < 2 || threshold as usize > signers.len() {
            return Err(MultisigError::InvalidThreshold(format!(
                "{threshold}-of-{} is not allowed",
                signers.len()
            )));
        }
        let now = self.clock.now();
        let mut wallet = MultisigWallet {
            wallet_id: random_id(),
            name: name.to_string(),
            description: description.to_string(),
            scheme,
            threshold,
            signers: Default::default(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut keys = HashSet::new();
        for spec in signers {
            spec.validate(scheme)?;
            if wallet.signers.contains_key(&spec.signer_id)
                || !keys.insert(spec.public_key.clone())
            {
                return Err(MultisigError::DuplicateSigner(spec.signer_id));
            }
            wallet.signers.insert(spec.signer_id.clone(), spec.into_signer(now));
        }
        wallet.check_threshold()?;

        self.save_wallet(&wallet)?;
        let wallet_id = wallet.wallet_id.clone();
        info!(
            wallet = %wallet_id,
            threshold,
            signers = wallet.signers.len(),
            ?scheme,
            by = created_by,
            "multisig wallet created"
        );
        self.wallets.write().insert(wallet_id.clone(), wallet);
        Ok(wallet_id)
    }

    pub fn add_signer(
        &self,
        wallet_id: &str,
        spec: SignerSpec,
        added_by: &str,
    ) -> Result<(), MultisigError> {
        let mut wallets = self.wallets.write();
        let wallet = wallets
            .get_mut(wallet_id)
            .ok_or_else(|| MultisigError::WalletNotFound(wallet_id.to_string()))?;
        self.check_signer_count(wallet.signers.len() + 1)?;
        spec.validate(wallet.scheme)?;
        if wallet.signers.contains_key(&spec.signer_id)
            || wallet.signers.values().any(|s| s.public_key == spec.public_key)
        {
            return Err(MultisigError::DuplicateSigner(spec.signer_id));
        }
        let now = self.clock.now();
        let mut updated = wallet.clone();
        let signer_id = spec.signer_id.clone();
        updated.signers.insert(signer_id.clone(), spec.into_signer(now));
        updated.updated_at = now;
        self.save_wallet(&updated)?;
        *wallet = updated;
        info!(wallet = wallet_id, signer = %signer_id, by = added_by, "signer added");
        Ok(())
    }

    /// Remove a signer. Refused when the wallet would drop below the signer
    /// floor or its threshold.
    pub fn remove_signer(
        &self,
        wallet_id: &str,
        signer_id: &str,
        removed_by: &str,
    ) -> Result<(), MultisigError> {
        self.update_wallet(wallet_id, |wallet| {
            if wallet.signers.remove(signer_id).is_none() {
                return Err(MultisigError::UnknownSigner(signer_id.to_string()));
            }
            self.check_signer_count(wallet.signers.len())
        })?;
        info!(wallet = wallet_id, signer = signer_id, by = removed_by, "signer removed");
        Ok(())
    }

    /// Suspend or reinstate a signer without removing it.
    pub fn set_signer_active(
        &self,
        wallet_id: &str,
        signer_id: &str,
        active: bool,
        changed_by: &str,
    ) -> Result<(), MultisigError> {
        self.update_wallet(wallet_id, |wallet| {
            let signer = wallet
                .signers
                .get_mut(signer_id)
                .ok_or_else(|| MultisigError::UnknownSigner(signer_id.to_string()))?;
            signer.active = active;
            Ok(())
        })?;
        info!(wallet = wallet_id, signer = signer_id, active, by = changed_by, "signer updated");
        Ok(())
    }

    /// Open a signature collection for `payload`. With a Tokio runtime
    /// available a watcher expires it at its deadline; otherwise expiry
    /// happens through [`expire_overdue`](Self::expire_overdue).
    pub fn create_transaction(
        self: &Arc<Self>,
        wallet_id: &str,
        tx_type: TransactionType,
        payload: Vec<u8>,
        description: &str,
        initiator: &str,
        ttl_secs: Option<u64>,
    ) -> Result<String, MultisigError> {
        let threshold = self
            .wallets
            .read()
            .get(wallet_id)
            .map(|w| w.threshold)
            .ok_or_else(|| MultisigError::WalletNotFound(wallet_id.to_string()))?;
        let now = self.clock.now();
        let ttl = ttl_secs.unwrap_or(self.settings.default_ttl_secs);
        let tx = MultisigTransaction {
            tx_id: random_id(),
            wallet_id: wallet_id.to_string(),
            tx_type,
            payload,
            description: description.to_string(),
            initiator: initiator.to_string(),
            status: TransactionStatus::Signing,
            required_signatures: threshold,
            signatures: Default::default(),
            authorization: None,
            created_at: now,
            expires_at: now.plus_secs(ttl),
            completed_at: None,
            error: None,
        };
        self.save_tx(&tx)?;
        let tx_id = tx.tx_id.clone();
        let expires_at = tx.expires_at;
        self.transactions
            .write()
            .insert(tx_id.clone(), Arc::new(Mutex::new(tx)));
        info!(tx = %tx_id, wallet = wallet_id, ?tx_type, ttl, by = initiator, "multisig transaction created");
        self.spawn_watcher(&tx_id, expires_at);
        Ok(tx_id)
    }

    /// Accept one signer's signature.
    ///
    /// Returns the transaction status after the signature is recorded. A
    /// rejected signature leaves the collection unchanged. Once completed,
    /// further valid signatures from other members are recorded as late and
    /// leave the authorization untouched.
    pub fn submit_signature(
        &self,
        tx_id: &str,
        signer_id: &str,
        signature: SignatureBytes,
        public_key: &PublicKeyBytes,
    ) -> Result<TransactionStatus, MultisigError> {
        let slot = self.slot(tx_id)?;
        let mut tx = slot.lock();
        let now = self.clock.now();

        if tx.is_overdue(now) {
            let mut expired = tx.clone();
            expired.finish(TransactionStatus::Expired, now, Some("signing window elapsed".into()));
            self.save_tx(&expired)?;
            *tx = expired;
            drop(tx);
            self.stop_watcher(tx_id);
            warn!(tx = tx_id, "signature arrived after the deadline");
            return Err(MultisigError::NotSigning {
                tx_id: tx_id.to_string(),
                status: TransactionStatus::Expired,
            });
        }
        if !matches!(tx.status, TransactionStatus::Signing | TransactionStatus::Completed) {
            return Err(MultisigError::NotSigning {
                tx_id: tx_id.to_string(),
                status: tx.status,
            });
        }

        let mut wallets = self.wallets.write();
        let wallet = wallets
            .get_mut(&tx.wallet_id)
            .ok_or_else(|| MultisigError::WalletNotFound(tx.wallet_id.clone()))?;
        let signer = wallet
            .active_signer(signer_id)
            .ok_or_else(|| MultisigError::UnknownSigner(signer_id.to_string()))?;
        if tx.signatures.contains_key(signer_id) {
            return Err(MultisigError::DuplicateSignature(signer_id.to_string()));
        }
        if signer.public_key != *public_key
            || !signer
                .key_kind
                .verify(public_key.as_bytes(), &tx.payload, signature.as_bytes())
        {
            warn!(tx = tx_id, signer = signer_id, "rejected invalid signature");
            return Err(MultisigError::InvalidSignature(signer_id.to_string()));
        }

        let late = tx.status == TransactionStatus::Completed;
        let mut updated = tx.clone();
        updated.signatures.insert(
            signer_id.to_string(),
            CollectedSignature {
                signer_id: signer_id.to_string(),
                public_key: public_key.clone(),
                signature,
                verified_at: now,
                late,
            },
        );
        let collected = updated.collected();
        if !late && collected >= updated.required_signatures {
            match Authorization::combine(wallet, &updated) {
                Ok(authorization) => {
                    updated.authorization = Some(authorization);
                    updated.finish(TransactionStatus::Completed, now, None);
                }
                Err(e) => {
                    error!(tx = tx_id, error = %e, "failed to combine signatures");
                    updated.finish(TransactionStatus::Failed, now, Some(e.to_string()));
                }
            }
        }

        let mut updated_wallet = wallet.clone();
        if let Some(s) = updated_wallet.signers.get_mut(signer_id) {
            s.last_signed = Some(now);
            s.signature_count += 1;
        }
        self.save_tx(&updated)?;
        self.save_wallet(&updated_wallet)?;
        *wallet = updated_wallet;
        drop(wallets);

        let status = updated.status;
        let finished = !late && status.is_final();
        info!(
            tx = tx_id,
            signer = signer_id,
            collected,
            required = updated.required_signatures,
            %status,
            late,
            "signature accepted"
        );
        *tx = updated;
        drop(tx);
        if finished {
            self.stop_watcher(tx_id);
        }
        Ok(status)
    }

    pub fn cancel_transaction(
        &self,
        tx_id: &str,
        cancelled_by: &str,
        reason: &str,
    ) -> Result<(), MultisigError> {
        let slot = self.slot(tx_id)?;
        {
            let mut tx = slot.lock();
            if tx.status != TransactionStatus::Signing {
                return Err(MultisigError::NotSigning {
                    tx_id: tx_id.to_string(),
                    status: tx.status,
                });
            }
            let mut updated = tx.clone();
            updated.finish(
                TransactionStatus::Cancelled,
                self.clock.now(),
                Some(format!("cancelled by {cancelled_by}: {reason}")),
            );
            self.save_tx(&updated)?;
            *tx = updated;
        }
        self.stop_watcher(tx_id);
        info!(tx = tx_id, by = cancelled_by, reason, "multisig transaction cancelled");
        Ok(())
    }

    pub fn get_status(&self, tx_id: &str) -> Result<TransactionInfo, MultisigError> {
        let slot = self.slot(tx_id)?;
        let tx = slot.lock();
        Ok(TransactionInfo::from(&*tx))
    }

    pub fn transaction(&self, tx_id: &str) -> Result<MultisigTransaction, MultisigError> {
        Ok(self.slot(tx_id)?.lock().clone())
    }

    /// The final authorization of a completed transaction.
    pub fn authorization(&self, tx_id: &str) -> Result<Option<Authorization>, MultisigError> {
        Ok(self.slot(tx_id)?.lock().authorization.clone())
    }

    pub fn wallet_info(&self, wallet_id: &str) -> Result<WalletInfo, MultisigError> {
        let signing = self
            .slots()
            .iter()
            .filter(|slot| {
                let tx = slot.lock();
                tx.wallet_id == wallet_id && tx.status == TransactionStatus::Signing
            })
            .count();
        let wallets = self.wallets.read();
        let wallet = wallets
            .get(wallet_id)
            .ok_or_else(|| MultisigError::WalletNotFound(wallet_id.to_string()))?;
        Ok(WalletInfo {
            active_signers: wallet.active_count(),
            active_weight: wallet.active_weight(),
            wallet: wallet.clone(),
            signing_transactions: signing,
        })
    }

    pub fn wallets(&self) -> Vec<MultisigWallet> {
        let mut wallets: Vec<_> = self.wallets.read().values().cloned().collect();
        wallets.sort_by(|a, b| (a.created_at, &a.wallet_id).cmp(&(b.created_at, &b.wallet_id)));
        wallets
    }

    /// Transactions of a wallet, oldest first.
    pub fn list_transactions(&self, wallet_id: &str) -> Vec<TransactionInfo> {
        let mut out: Vec<TransactionInfo> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let tx = slot.lock();
                (tx.wallet_id == wallet_id).then(|| TransactionInfo::from(&*tx))
            })
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.tx_id).cmp(&(b.created_at, &b.tx_id)));
        out
    }

    /// Expire every signing transaction past its deadline. Returns the ids
    /// that were expired.
    pub fn expire_overdue(&self) -> Vec<String> {
        let ids: Vec<String> = self.transactions.read().keys().cloned().collect();
        let expired: Vec<String> = ids
            .into_iter()
            .filter(|id| self.expire_if_overdue(id))
            .collect();
        for id in &expired {
            self.stop_watcher(id);
        }
        expired
    }

    /// Drop finished transactions older than `retention_secs`.
    pub fn cleanup(&self, retention_secs: u64) -> Result<usize, MultisigError> {
        let cutoff = self.clock.now().minus_secs(retention_secs);
        let stale: Vec<String> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let tx = slot.lock();
                let done = tx.completed_at?;
                (tx.status.is_final() && done <= cutoff).then(|| tx.tx_id.clone())
            })
            .collect();
        for tx_id in &stale {
            if let Some(records) = &self.records {
                records.transactions.remove(tx_id)?;
            }
            self.transactions.write().remove(tx_id);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), "finished multisig transactions pruned");
        }
        Ok(stale.len())
    }

    pub fn retention_secs(&self) -> u64 {
        self.settings.retention_secs
    }

    pub fn status(&self) -> MultisigSummary {
        let mut summary = MultisigSummary {
            wallets: self.wallets.read().len(),
            watchers: self.watchers.lock().len(),
            ..Default::default()
        };
        for slot in self.slots() {
            match slot.lock().status {
                TransactionStatus::Signing => summary.signing += 1,
                TransactionStatus::Completed => summary.completed += 1,
                TransactionStatus::Failed => summary.failed += 1,
                TransactionStatus::Cancelled => summary.cancelled += 1,
                TransactionStatus::Expired => summary.expired += 1,
            }
        }
        summary
    }

    /// Spawn a watcher for every transaction still signing. Used after
    /// loading saved records.
    pub fn start_watchers(self: &Arc<Self>) -> usize {
        let signing: Vec<(String, Timestamp)> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let tx = slot.lock();
                (tx.status == TransactionStatus::Signing).then(|| (tx.tx_id.clone(), tx.expires_at))
            })
            .collect();
        for (tx_id, expires_at) in &signing {
            self.spawn_watcher(tx_id, *expires_at);
        }
        signing.len()
    }

    /// Stop every watcher and wait for them to finish. Transactions that are
    /// still signing stay signing on disk and resume on the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.watchers.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in &handles {
            handle.abort();
        }
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            warn!("multisig watchers did not stop within {SHUTDOWN_TIMEOUT:?}");
        }
        info!(watchers = count, "multisig watchers stopped");
    }

    fn expire_if_overdue(&self, tx_id: &str) -> bool {
        let Ok(slot) = self.slot(tx_id) else {
            return false;
        };
        let mut tx = slot.lock();
        let now = self.clock.now();
        if !tx.is_overdue(now) {
            return false;
        }
        let mut expired = tx.clone();
        expired.finish(TransactionStatus::Expired, now, Some("signing window elapsed".into()));
        if let Err(e) = self.save_tx(&expired) {
            error!(tx = tx_id, error = %e, "failed to persist expired transaction");
            return false;
        }
        warn!(
            tx = tx_id,
            collected = expired.collected(),
            required = expired.required_signatures,
            "multisig transaction expired"
        );
        *tx = expired;
        true
    }

    fn spawn_watcher(self: &Arc<Self>, tx_id: &str, expires_at: Timestamp) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(tx = tx_id, "no async runtime, expiry left to sweeps");
            return;
        };
        let manager: Weak<Self> = Arc::downgrade(self);
        let id = tx_id.to_string();
        let handle = runtime.spawn(async move {
            loop {
                let wait = {
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    if manager.expire_if_overdue(&id) {
                        manager.watchers.lock().remove(&id);
                        return;
                    }
                    let signing = manager
                        .slot(&id)
                        .is_ok_and(|slot| slot.lock().status == TransactionStatus::Signing);
                    if !signing {
                        return;
                    }
                    expires_at.secs_until(manager.clock.now()).max(1)
                };
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
        });
        let mut watchers = self.watchers.lock();
        watchers.retain(|_, h| !h.is_finished());
        if let Some(previous) = watchers.insert(tx_id.to_string(), handle) {
            previous.abort();
        }
    }

    fn stop_watcher(&self, tx_id: &str) {
        if let Some(handle) = self.watchers.lock().remove(tx_id) {
            handle.abort();
        }
    }

    fn slot(&self, tx_id: &str) -> Result<TxSlot, MultisigError> {
        self.transactions
            .read()
            .get(tx_id)
            .cloned()
            .ok_or_else(|| MultisigError::TransactionNotFound(tx_id.to_string()))
    }

    fn slots(&self) -> Vec<TxSlot> {
        self.transactions.read().values().cloned().collect()
    }

    fn check_signer_count(&self, count: usize) -> Result<(), MultisigError> {
        if count < self.settings.min_signers || count > self.settings.max_signers {
            return Err(MultisigError::SignerCount {
                count,
                min: self.settings.min_signers,
                max: self.settings.max_signers,
            });
        }
        Ok(())
    }

    /// Apply `f` to a copy of the wallet, check the threshold still holds,
    /// persist, then publish.
    fn update_wallet(
        &self,
        wallet_id: &str,
        f: impl FnOnce(&mut MultisigWallet) -> Result<(), MultisigError>,
    ) -> Result<(), MultisigError> {
        let mut wallets = self.wallets.write();
        let wallet = wallets
            .get_mut(wallet_id)
            .ok_or_else(|| MultisigError::WalletNotFound(wallet_id.to_string()))?;
        let mut updated = wallet.clone();
        f(&mut updated)?;
        updated.check_threshold()?;
        updated.updated_at = self.clock.now();
        self.save_wallet(&updated)?;
        *wallet = updated;
        Ok(())
    }

    fn save_wallet(&self, wallet: &MultisigWallet) -> Result<(), MultisigError> {
        if let Some(records) = &self.records {
            records.wallets.save(&wallet.wallet_id, wallet)?;
        }
        Ok(())
    }

    fn save_tx(&self, tx: &MultisigTransaction) -> Result<(), MultisigError> {
        if let Some(records) = &self.records {
            records.transactions.save(&tx.tx_id, tx)?;
        }
        Ok(())
    }
}
