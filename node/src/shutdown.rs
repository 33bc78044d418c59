//! Shutdown signalling for the node's background loops.
//!
//! The first trigger wins and is latched: a loop that subscribes after
//! shutdown began still sees it on its first `recv`.

use tokio::signal;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// [`ShutdownController::shutdown`] was called.
    Requested,
}

pub struct ShutdownController {
    tx: watch::Sender<Option<ShutdownReason>>,
}

/// Receiving end handed to each background loop.
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        self.trigger(ShutdownReason::Requested);
    }

    /// Why shutdown was triggered, if it has been.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    fn trigger(&self, reason: ShutdownReason) {
        self.tx.send_if_modified(|current| match current {
            Some(_) => false,
            None => {
                *current = Some(reason);
                true
            }
        });
    }

    /// Wait for SIGINT, SIGTERM or a programmatic request, latch it, and
    /// return the reason.
    pub async fn wait_for_signal(&self) -> ShutdownReason {
        let mut requested = self.subscribe();
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let reason = tokio::select! {
            _ = ctrl_c => ShutdownReason::Interrupt,
            _ = terminate => ShutdownReason::Terminate,
            reason = requested.recv() => reason,
        };
        tracing::info!(?reason, "shutting down");
        self.trigger(reason);
        reason
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered. Dropping the controller
    /// counts as a request.
    pub async fn recv(&mut self) -> ShutdownReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            Err(_) => ShutdownReason::Requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn programmatic_shutdown_reaches_every_listener() {
        let controller = ShutdownController::new();
        let mut a = controller.subscribe();
        let mut b = controller.subscribe();
        controller.shutdown();
        assert_eq!(a.recv().await, ShutdownReason::Requested);
        assert_eq!(b.recv().await, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn late_listener_sees_earlier_shutdown() {
        let controller = ShutdownController::new();
        controller.shutdown();
        let mut late = controller.subscribe();
        let reason = tokio::time::timeout(Duration::from_secs(1), late.recv()).await;
        assert_eq!(reason.ok(), Some(ShutdownReason::Requested));
    }

    #[tokio::test]
    async fn first_reason_is_kept() {
        let controller = ShutdownController::new();
        controller.trigger(ShutdownReason::Terminate);
        controller.shutdown();
        assert_eq!(controller.reason(), Some(ShutdownReason::Terminate));
    }

    #[tokio::test]
    async fn wait_for_signal_returns_on_request() {
        let controller = std::sync::Arc::new(ShutdownController::new());
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.wait_for_signal().await })
        };
        tokio::task::yield_now().await;
        controller.shutdown();
        let reason = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(reason, Ok(Ok(ShutdownReason::Requested))));
    }

    #[tokio::test]
    async fn dropped_controller_releases_listeners() {
        let controller = ShutdownController::new();
        let mut listener = controller.subscribe();
        drop(controller);
        assert_eq!(listener.recv().await, ShutdownReason::Requested);
    }
}
