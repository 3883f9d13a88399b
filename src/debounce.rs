//! Cancellable scheduled-task primitive
//!
//! One slot, one pending task. Re-scheduling replaces whatever was pending,
//! so a burst of requests collapses into the last one. Used for the history
//! flush and for clearing the peer-echo suppression window.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// A single delayed task; scheduling again cancels the previous one.
#[derive(Debug)]
pub struct Debounce {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Run `work` after the configured delay, replacing any pending run.
    pub fn schedule<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available; dropping scheduled task");
            return;
        };
        let delay = self.delay;
        let mut slot = self.slot();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        }));
    }

    /// Cancel the pending run, if any.
    pub fn cancel(&self) {
        if let Some(pending) = self.slot().take() {
            pending.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Debounce {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_after_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let debounce = Debounce::new(Duration::from_millis(10));
        let c = Arc::clone(&counter);
        debounce.schedule(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rescheduling_coalesces_bursts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let debounce = Debounce::new(Duration::from_millis(30));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            debounce.schedule(async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_the_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let debounce = Debounce::new(Duration::from_millis(10));
        let c = Arc::clone(&counter);
        debounce.schedule(async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        debounce.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!debounce.is_pending());
    }
}
