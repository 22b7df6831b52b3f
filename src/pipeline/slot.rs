//! One-deep, drop-oldest handoff between a producer and the relay loop
//!
//! The producer never blocks: offering a new item while one is still
//! pending replaces it and counts a drop. The consumer waits for the next
//! item or for the slot to be closed.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::utils::lock;

struct Inner<T> {
    item: Option<T>,
    closed: bool,
}

pub struct LatestSlot<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                item: None,
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store `item`, discarding any unconsumed one.
    ///
    /// Returns `true` if an older item was dropped. Offers after
    /// [`LatestSlot::close`] are discarded.
    pub fn offer(&self, item: T) -> bool {
        let replaced = {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return false;
            }
            inner.item.replace(item).is_some()
        };
        if replaced {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        replaced
    }

    /// No more items will be offered; a pending item can still be taken
    pub fn close(&self) {
        lock(&self.inner).closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Take the pending item without waiting
    pub fn try_take(&self) -> Option<T> {
        lock(&self.inner).item.take()
    }

    /// Wait for the next item; `None` once the slot is closed and drained.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = lock(&self.inner);
                if let Some(item) = inner.item.take() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Number of items waiting (zero or one)
    pub fn pending(&self) -> usize {
        usize::from(lock(&self.inner).item.is_some())
    }

    /// Total items discarded by overwrites
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_overwrite_drops_oldest() {
        let slot = LatestSlot::new();

        assert!(!slot.offer(1));
        assert!(slot.offer(2));
        assert!(slot.offer(3));

        assert_eq!(slot.pending(), 1);
        assert_eq!(slot.dropped(), 2);
        assert_eq!(slot.try_take(), Some(3));
        assert_eq!(slot.try_take(), None);
    }

    #[tokio::test]
    async fn test_fast_producer_never_buffers_more_than_one() {
        let slot = Arc::new(LatestSlot::new());
        let producer = {
            let slot = slot.clone();
            tokio::spawn(async move {
                for i in 0..500u32 {
                    slot.offer(i);
                    assert!(slot.pending() <= 1);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                slot.close();
            })
        };

        let mut seen = Vec::new();
        while let Some(i) = slot.take().await {
            seen.push(i);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        producer.await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&499));
        assert_eq!(seen.len() as u64 + slot.dropped(), 500);
    }

    #[tokio::test]
    async fn test_take_returns_pending_then_none_after_close() {
        let slot = LatestSlot::new();
        slot.offer("last");
        slot.close();

        assert!(!slot.offer("ignored"));
        assert_eq!(slot.take().await, Some("last"));
        assert_eq!(slot.take().await, None);
    }

    #[tokio::test]
    async fn test_take_wakes_on_close() {
        let slot = Arc::new(LatestSlot::<u8>::new());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.take().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        slot.close();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, None);
    }
}
