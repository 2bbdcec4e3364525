//! Flush Notifier
//!
//! Each writer owns one notifier: a pending-flush counter plus a sticky
//! first-wins error slot. Flush tasks decrement the counter as they finish;
//! close waits for it to drain. The first error latched here poisons the
//! writer for good. Once set, the whole file is considered unavailable and
//! internal byte accounting may be stale, so nothing attempts partial-file
//! recovery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Poll interval for the bounded drain waits.
pub(crate) const WAIT_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
pub struct FlushNotifier {
    pending: AtomicU32,
    error: OnceLock<Error>,
}

impl FlushNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pending(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_pending(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Latch an error. Only the first caller wins; later errors are dropped.
    /// Returns whether this call set the slot.
    pub fn set_error(&self, error: Error) -> bool {
        self.error.set(error).is_ok()
    }

    pub fn has_error(&self) -> bool {
        self.error.get().is_some()
    }

    pub fn error(&self) -> Option<Error> {
        self.error.get().cloned()
    }

    /// Raise the latched error, if any.
    pub fn check(&self) -> Result<()> {
        match self.error.get() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Wait for the pending count to reach zero, polling every
    /// [`WAIT_INTERVAL`]. A latched error short-circuits the wait; missing
    /// the deadline latches a `Timeout`.
    pub async fn await_drain(&self, deadline: Instant) -> Result<()> {
        while self.pending() > 0 && Instant::now() < deadline {
            self.check()?;
            tokio::time::sleep(WAIT_INTERVAL).await;
        }
        if self.pending() > 0 {
            let error = Error::Timeout("waiting for pending flushes to drain".to_string());
            self.set_error(error.clone());
            return Err(error);
        }
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_counts() {
        let notifier = FlushNotifier::new();
        assert_eq!(notifier.pending(), 0);
        notifier.inc_pending();
        notifier.inc_pending();
        notifier.dec_pending();
        assert_eq!(notifier.pending(), 1);
    }

    #[test]
    fn test_first_error_wins() {
        let notifier = FlushNotifier::new();
        assert!(!notifier.has_error());
        assert!(notifier.check().is_ok());

        assert!(notifier.set_error(Error::Destroyed));
        assert!(!notifier.set_error(Error::Io("later".to_string())));

        assert!(notifier.has_error());
        assert_eq!(notifier.error(), Some(Error::Destroyed));
        assert_eq!(notifier.check(), Err(Error::Destroyed));
    }

    #[tokio::test]
    async fn test_await_drain_immediate_when_idle() {
        let notifier = FlushNotifier::new();
        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(notifier.await_drain(deadline).await.is_ok());
    }

    #[tokio::test]
    async fn test_await_drain_times_out_and_latches() {
        let notifier = FlushNotifier::new();
        notifier.inc_pending();

        let deadline = Instant::now() + Duration::from_millis(60);
        let result = notifier.await_drain(deadline).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        // The timeout is now the sticky error for every later operation.
        assert!(matches!(notifier.check(), Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_await_drain_short_circuits_on_error() {
        let notifier = FlushNotifier::new();
        notifier.inc_pending();
        notifier.set_error(Error::Io("disk gone".to_string()));

        let deadline = Instant::now() + Duration::from_secs(10);
        let start = Instant::now();
        let result = notifier.await_drain(deadline).await;
        assert_eq!(result, Err(Error::Io("disk gone".to_string())));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_await_drain_sees_late_decrement() {
        use std::sync::Arc;

        let notifier = Arc::new(FlushNotifier::new());
        notifier.inc_pending();

        let background = {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                notifier.dec_pending();
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(notifier.await_drain(deadline).await.is_ok());
        background.await.unwrap();
    }
}
