//! In-flight session tracker
//!
//! Counts bridge sessions so the owning server can drain them on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared count of active sessions
#[derive(Clone)]
pub struct InFlightTracker {
    count: Arc<watch::Sender<usize>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    /// Register a session; it counts until the guard drops
    pub fn enter(&self) -> InFlightGuard {
        self.count.send_modify(|count| *count += 1);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until no session is active
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Wait until idle or `timeout` elapses; returns whether idle was reached
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one session counted while alive
pub struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enter_and_leave() {
        let tracker = InFlightTracker::new();
        assert_eq!(tracker.count(), 0);

        let a = tracker.enter();
        let b = tracker.enter();
        assert_eq!(tracker.count(), 2);

        drop(a);
        assert_eq!(tracker.count(), 1);
        drop(b);
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_on_panic() {
        let tracker = InFlightTracker::new();
        let task_tracker = tracker.clone();
        let result = tokio::spawn(async move {
            let _guard = task_tracker.enter();
            panic!("session failed");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let tracker = InFlightTracker::new();
        let guard = tracker.enter();

        let waiter = tracker.clone();
        let wait = tokio::spawn(async move { waiter.wait_idle().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!wait.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_timeout() {
        let tracker = InFlightTracker::new();
        assert!(tracker.wait_idle_timeout(Duration::from_secs(1)).await);

        let _guard = tracker.enter();
        assert!(!tracker.wait_idle_timeout(Duration::from_secs(1)).await);
    }
}
