//! # Readiness notification
//!
//! Wakes the dispatch loop when work may have become dispatchable: a task
//! was enqueued or re-queued, or an agent slot was freed. Replaces polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

/// Task ready notification
///
/// Backed by `tokio::sync::Notify`; a notification sent while nobody waits
/// is stored, so a wake-up between two waits is never lost. Multiple
/// notifications coalesce into one.
#[derive(Clone)]
pub struct ReadyNotify {
    notify: Arc<Notify>,
}

impl std::fmt::Debug for ReadyNotify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyNotify").finish_non_exhaustive()
    }
}

impl ReadyNotify {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn notify_ready(&self) {
        trace!("Notifying that tasks are ready");
        self.notify.notify_one();
    }

    pub async fn wait_for_ready(&self) {
        self.notify.notified().await;
        trace!("Received ready notification");
    }

    /// Returns true if notified, false on timeout.
    pub async fn wait_for_ready_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}

impl Default for ReadyNotify {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notification_before_wait_is_kept() {
        let notify = ReadyNotify::new();
        notify.notify_ready();
        assert!(notify.wait_for_ready_timeout(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_timeout_without_notification() {
        let notify = ReadyNotify::new();
        assert!(!notify.wait_for_ready_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_notifications_coalesce() {
        let notify = ReadyNotify::new();
        notify.notify_ready();
        notify.notify_ready();
        assert!(notify.wait_for_ready_timeout(Duration::from_millis(50)).await);
        assert!(!notify.wait_for_ready_timeout(Duration::from_millis(10)).await);
    }
}
