//! Merged timeout + client-disconnect cancellation for one run.
//!
//! Two independent sources can abort an in-flight agent call: a wall-clock
//! deadline and the inbound client hanging up. [`RunCancellation`] races the
//! two onto a single [`CancellationToken`] and records which source won, so
//! the gateway can tell a timeout from a disconnect after the fact.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which source fired the merged token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Timeout,
    ClientDisconnect,
}

/// Guard for one run's cancellation scope.
///
/// The watcher task listening on the client token is detached when the guard
/// drops, on every exit path, so nothing leaks across requests.
#[derive(Debug)]
pub struct RunCancellation {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    watcher: Option<JoinHandle<()>>,
}

impl RunCancellation {
    /// Arm the deadline and bind the caller's disconnect signal.
    ///
    /// A `client_token` that is already cancelled fires the merged token
    /// synchronously with reason [`CancelReason::ClientDisconnect`]; no timer
    /// is armed in that case.
    pub fn start(client_token: CancellationToken, timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let reason = Arc::new(OnceLock::new());

        if client_token.is_cancelled() {
            let _ = reason.set(CancelReason::ClientDisconnect);
            token.cancel();
            return Self {
                token,
                reason,
                watcher: None,
            };
        }

        let watcher = tokio::spawn({
            let token = token.clone();
            let reason = Arc::clone(&reason);
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        let _ = reason.set(CancelReason::Timeout);
                    }
                    _ = client_token.cancelled() => {
                        let _ = reason.set(CancelReason::ClientDisconnect);
                    }
                }
                token.cancel();
            }
        });

        Self {
            token,
            reason,
            watcher: Some(watcher),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The source that fired, once one has.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }
}

impl Drop for RunCancellation {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_with_timeout_reason_when_deadline_elapses() {
        let guard = RunCancellation::start(CancellationToken::new(), Duration::from_millis(20));

        guard.token().cancelled().await;
        assert_eq!(guard.reason(), Some(CancelReason::Timeout));
    }

    #[tokio::test]
    async fn fires_with_disconnect_reason_when_client_hangs_up_first() {
        let client = CancellationToken::new();
        let guard = RunCancellation::start(client.clone(), Duration::from_secs(60));

        client.cancel();
        guard.token().cancelled().await;
        assert_eq!(guard.reason(), Some(CancelReason::ClientDisconnect));
    }

    #[tokio::test]
    async fn already_cancelled_client_token_fires_synchronously() {
        let client = CancellationToken::new();
        client.cancel();

        let guard = RunCancellation::start(client, Duration::from_secs(60));
        assert!(guard.is_cancelled());
        assert_eq!(guard.reason(), Some(CancelReason::ClientDisconnect));
    }

    #[tokio::test]
    async fn drop_detaches_the_watcher() {
        let client = CancellationToken::new();
        let guard = RunCancellation::start(client.clone(), Duration::from_secs(60));
        let merged = guard.token().clone();
        drop(guard);

        client.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!merged.is_cancelled());
    }
}
