//! In-process publish/subscribe fabric
//!
//! Fan-out used by the S3 notification listen stream, the trace stream and
//! the console log stream. Publishing is non-blocking by contract: each
//! subscriber owns a bounded buffer and an event that does not fit is dropped
//! for that subscriber only. A slow reader never stalls a publisher and never
//! stalls the other subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;

/// Buffered events per subscriber. Bursts beyond this are dropped for the
/// subscriber that fell behind.
pub const SUBSCRIBER_BUFFER: usize = 2000;

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Subscription<T> {
    id: u64,
    tx: mpsc::Sender<T>,
    filter: Filter<T>,
}

/// A fan-out point for one category of events.
pub struct Publisher<T> {
    subs: RwLock<Vec<Arc<Subscription<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Publisher<T> {
    pub fn new() -> Self {
        Self {
            subs: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn num_subscribers(&self) -> usize {
        self.subs.read().expect("subscriber set poisoned").len()
    }

    pub fn has_subscribers(&self) -> bool {
        self.num_subscribers() > 0
    }

    /// Removes a subscription. Safe to call for an id that is already gone.
    pub fn unsubscribe(&self, id: u64) {
        let mut subs = self.subs.write().expect("subscriber set poisoned");
        subs.retain(|s| s.id != id);
    }
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Registers a subscription delivering into `tx` every published event
    /// for which `filter` returns true. The subscription lives until the
    /// returned handle is dropped or the receiving side goes away.
    pub fn subscribe(
        publisher: &Arc<Self>,
        tx: mpsc::Sender<T>,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> SubscriptionHandle<T> {
        let id = publisher.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscription {
            id,
            tx,
            filter: Box::new(filter),
        });
        publisher
            .subs
            .write()
            .expect("subscriber set poisoned")
            .push(sub);
        SubscriptionHandle {
            publisher: Arc::downgrade(publisher),
            id,
        }
    }

    /// Delivers `item` to every matching subscriber whose buffer has room.
    /// Returns the number of subscribers the event reached. A publisher with
    /// no subscribers is a no-op.
    pub fn publish(&self, item: &T) -> usize {
        // Snapshot under the read lock; sends happen with no lock held.
        let snapshot: Vec<Arc<Subscription<T>>> = {
            let subs = self.subs.read().expect("subscriber set poisoned");
            subs.iter().cloned().collect()
        };
        if snapshot.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut closed = Vec::new();
        for sub in &snapshot {
            if !(sub.filter)(item) {
                continue;
            }
            match sub.tx.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                // Buffer full: drop the event for this subscriber only.
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }
        delivered
    }
}

/// Deregisters its subscription on drop.
pub struct SubscriptionHandle<T> {
    publisher: Weak<Publisher<T>>,
    id: u64,
}

impl<T> SubscriptionHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Drop for SubscriptionHandle<T> {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.upgrade() {
            publisher.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let publisher: Arc<Publisher<u32>> = Arc::new(Publisher::new());
        assert_eq!(publisher.publish(&7), 0);
    }

    #[tokio::test]
    async fn filter_selects_events() {
        let publisher = Arc::new(Publisher::new());
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _handle = Publisher::subscribe(&publisher, tx, |v: &u32| v % 2 == 0);

        publisher.publish(&1);
        publisher.publish(&2);
        assert_eq!(rx.recv().await, Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_when_full_is_lossy_and_isolated() {
        let publisher = Arc::new(Publisher::new());
        let (slow_tx, mut slow_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (fast_tx, mut fast_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _slow = Publisher::subscribe(&publisher, slow_tx, |_: &u64| true);
        let _fast = Publisher::subscribe(&publisher, fast_tx, |_: &u64| true);

        // Fill both buffers, then drain only the fast subscriber and keep
        // publishing: the slow one drops, the fast one keeps receiving.
        for i in 0..SUBSCRIBER_BUFFER as u64 {
            assert_eq!(publisher.publish(&i), 2);
        }
        for _ in 0..SUBSCRIBER_BUFFER {
            fast_rx.recv().await.unwrap();
        }
        assert_eq!(publisher.publish(&u64::MAX), 1);
        assert_eq!(fast_rx.recv().await, Some(u64::MAX));

        // The slow subscriber still holds its original backlog, nothing more.
        assert_eq!(slow_rx.recv().await, Some(0));
        let mut seen = 1;
        while slow_rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn dropping_handle_removes_subscription() {
        let publisher = Arc::new(Publisher::new());
        let (tx, _rx) = mpsc::channel(1);
        let handle = Publisher::subscribe(&publisher, tx, |_: &u32| true);
        assert_eq!(publisher.num_subscribers(), 1);
        drop(handle);
        assert_eq!(publisher.num_subscribers(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let publisher = Arc::new(Publisher::new());
        let (tx, _rx) = mpsc::channel(1);
        let handle = Publisher::subscribe(&publisher, tx, |_: &u32| true);
        let id = handle.id();
        publisher.unsubscribe(id);
        publisher.unsubscribe(id);
        assert_eq!(publisher.num_subscribers(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_is_pruned_on_publish() {
        let publisher = Arc::new(Publisher::new());
        let (tx, rx) = mpsc::channel(1);
        let _handle = Publisher::subscribe(&publisher, tx, |_: &u32| true);
        drop(rx);
        assert_eq!(publisher.publish(&1), 0);
        assert_eq!(publisher.num_subscribers(), 0);
    }
}
