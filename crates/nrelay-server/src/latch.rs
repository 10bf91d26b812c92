//! Countdown latch gating EOSE on a multi-filter REQ.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Released once every filter of a subscription has finished streaming its
/// stored events (or failed).
pub struct EoseLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl EoseLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    /// Count down by one. Extra calls past zero are ignored.
    pub fn done(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Resolve once the count reaches zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_count_is_already_open() {
        EoseLatch::new(0).wait().await;
    }

    #[tokio::test]
    async fn opens_after_last_done() {
        let latch = Arc::new(EoseLatch::new(3));
        let waiter = tokio::spawn({
            let latch = latch.clone();
            async move { latch.wait().await }
        });

        latch.done();
        latch.done();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        latch.done();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        latch.done();
        assert_eq!(latch.remaining(), 0);
    }
}
