//! The custody node: a [`CustodyContext`] plus the background loops that
//! keep it healthy.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::{CustodyContext, NodeError, ShutdownController};

/// Maximum time to wait for background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Actor recorded on rotations started by the scan loop.
pub const SYSTEM_ACTOR: &str = "system";

pub struct KeyguardNode {
    context: Arc<CustodyContext>,
    shutdown: ShutdownController,
    /// Handles for spawned background tasks (joined during shutdown).
    task_handles: Vec<JoinHandle<()>>,
}

impl KeyguardNode {
    pub fn new(context: CustodyContext) -> Self {
        Self {
            context: Arc::new(context),
            shutdown: ShutdownController::new(),
            task_handles: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<CustodyContext> {
        &self.context
    }

    pub fn is_running(&self) -> bool {
        !self.task_handles.is_empty()
    }

    /// Spawn the maintenance loops. Must be called inside a tokio runtime.
    /// Calling it on a running node does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let config = self.context.config().clone();

        // ── Hardware liveness: flag devices that stopped answering ─────
        let ctx = Arc::clone(&self.context);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = Duration::from_secs(config.hardware.liveness_interval_secs.max(1));
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("hardware liveness task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let unresponsive = ctx.hardware().liveness_sweep().await;
                        if unresponsive > 0 {
                            tracing::warn!(unresponsive, "unresponsive devices marked as errored");
                        }
                    }
                }
            }
        }));

        // ── Rotation scan: rotate due keys and prune old tasks ─────────
        let ctx = Arc::clone(&self.context);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = Duration::from_secs(config.rotation.scan_interval_secs.max(1));
        let task_retention = config.rotation.task_retention_secs;
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("rotation scan task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let rotation = ctx.rotation();
                        let report = rotation.auto_rotate_due(SYSTEM_ACTOR);
                        for (key_id, task_id) in &report.rotated {
                            tracing::info!(key_id = %key_id, task_id = %task_id, "scheduled rotation completed");
                        }
                        for key_id in &report.needs_attention {
                            tracing::warn!(key_id = %key_id, "rotation due but needs approval");
                        }
                        for (key_id, error) in &report.failed {
                            tracing::error!(key_id = %key_id, error = %error, "scheduled rotation failed");
                        }
                        let warning = rotation.keys_in_warning_window();
                        if !warning.is_empty() {
                            tracing::info!(keys = warning.len(), "keys approaching rotation");
                        }
                        match rotation.cleanup_tasks(task_retention) {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(removed, "pruned finished rotation tasks"),
                            Err(e) => tracing::warn!("rotation task cleanup failed: {e}"),
                        }
                    }
                }
            }
        }));

        // ── Multisig: expire overdue transactions, drop old ones ───────
        let ctx = Arc::clone(&self.context);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = Duration::from_secs(config.multisig.cleanup_interval_secs.max(1));
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("multisig cleanup task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let multisig = ctx.multisig();
                        let expired = multisig.expire_overdue();
                        if !expired.is_empty() {
                            tracing::info!(count = expired.len(), "multisig transactions expired");
                        }
                        match multisig.cleanup(multisig.retention_secs()) {
                            Ok(0) => {}
                            Ok(removed) => tracing::debug!(removed, "removed finished multisig transactions"),
                            Err(e) => tracing::warn!("multisig cleanup failed: {e}"),
                        }
                    }
                }
            }
        }));

        // ── Session sweep: RBAC sessions, audit retention, vault sessions ──
        let ctx = Arc::clone(&self.context);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = Duration::from_secs(config.rbac.sweep_interval_secs.max(1));
        self.task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("session sweep task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match ctx.rbac().sweep() {
                            Ok(report) if report.expired_sessions + report.pruned_events > 0 => {
                                tracing::debug!(
                                    expired_sessions = report.expired_sessions,
                                    pruned_events = report.pruned_events,
                                    "rbac sweep"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("rbac sweep failed: {e}"),
                        }
                        let closed = ctx.vault().sweep_sessions();
                        if closed > 0 {
                            tracing::debug!(closed, "expired vault sessions closed");
                        }
                    }
                }
            }
        }));

        let watchers = self.context.multisig().start_watchers();
        tracing::info!(
            tasks = self.task_handles.len(),
            multisig_watchers = watchers,
            "keyguard node started"
        );
    }

    /// Start, wait for SIGINT/SIGTERM, then stop.
    pub async fn run_until_signal(&mut self) -> Result<(), NodeError> {
        self.start();
        self.shutdown.wait_for_signal().await;
        self.stop().await
    }

    /// Stop the background loops and seal the context.
    ///
    /// Secrets are wiped even when a loop fails to finish in time; in that
    /// case the call still reports [`NodeError::ShutdownTimeout`].
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("keyguard node stopping");
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let timed_out = tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all)
            .await
            .is_err();
        if timed_out {
            tracing::warn!(
                "shutdown timeout ({:?}), some tasks may still be running",
                SHUTDOWN_TIMEOUT
            );
        }

        self.context.seal().await;
        // A fresh controller so a later `start` gets live loops.
        self.shutdown = ShutdownController::new();
        tracing::info!("keyguard node stopped");
        if timed_out {
            return Err(NodeError::ShutdownTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InitOptions, KeyguardConfig};
    use keyguard_crypto::KdfParams;
    use keyguard_hardware::UnavailableTransport;
    use keyguard_keystore::StoreStatus;
    use keyguard_nullables::ManualClock;

    fn test_config(dir: &std::path::Path) -> KeyguardConfig {
        let mut config = KeyguardConfig::with_data_dir(dir);
        let light = KdfParams::light();
        config.kdf.memory_kib = light.memory_kib;
        config.kdf.iterations = light.iterations;
        config.kdf.parallelism = light.parallelism;
        config
    }

    fn test_node(dir: &std::path::Path) -> KeyguardNode {
        let config = test_config(dir);
        let (_, clock) = ManualClock::shared(1_700_000_000);
        CustodyContext::initialize(
            &config,
            clock.clone(),
            &InitOptions {
                name: "test",
                admin_user: "root",
                admin_password: "correct horse",
                keystore_passphrase: "keystore-pass",
                vault_passphrase: "vault-pass",
            },
        )
        .unwrap();
        let context = CustodyContext::open(config, clock, Arc::new(UnavailableTransport)).unwrap();
        KeyguardNode::new(context)
    }

    #[tokio::test]
    async fn start_and_stop_joins_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = test_node(dir.path());
        node.start();
        assert!(node.is_running());
        node.stop().await.unwrap();
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = test_node(dir.path());
        node.start();
        let tasks = node.task_handles.len();
        node.start();
        assert_eq!(node.task_handles.len(), tasks);
        node.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_locks_the_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = test_node(dir.path());
        node.start();
        node.stop().await.unwrap();
        assert_eq!(node.context().status().keystore.status, StoreStatus::Locked);
    }
}
