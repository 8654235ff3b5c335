//! Bounded FIFO buffer for calls awaiting a concurrency slot.
//!
//! Items are owned by the queue from enqueue until the drain loop takes
//! them; each carries a oneshot channel that settles the submitter's
//! future when the call finally runs, is denied, or is evicted.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::config::QueueFullPolicy;
use crate::error::GovernorError;
use crate::governor::Callable;

pub(crate) struct QueueItem<T> {
    pub call: Callable<T>,
    pub enqueued_at: Instant,
    pub tx: oneshot::Sender<Result<T, GovernorError>>,
}

pub(crate) struct BoundedQueue<T> {
    items: Mutex<VecDeque<QueueItem<T>>>,
    capacity: usize,
    policy: QueueFullPolicy,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, policy: QueueFullPolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            policy,
        }
    }

    /// Append an item, enforcing the capacity bound.
    ///
    /// Under `RejectNew` a full queue hands the item back unchanged so the
    /// caller can fail fast. Under `DropOldest` the oldest waiters are
    /// evicted and settled with `QueueFull` to make room.
    pub fn try_push(&self, item: QueueItem<T>) -> Result<(), QueueItem<T>> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            match self.policy {
                QueueFullPolicy::RejectNew => return Err(item),
                QueueFullPolicy::DropOldest => {
                    while items.len() >= self.capacity {
                        let Some(evicted) = items.pop_front() else {
                            break;
                        };
                        tracing::warn!(
                            waited = ?evicted.enqueued_at.elapsed(),
                            "evicting oldest queued call to admit a new one"
                        );
                        let _ = evicted.tx.send(Err(GovernorError::QueueFull {
                            capacity: self.capacity,
                        }));
                    }
                }
            }
        }
        items.push_back(item);
        Ok(())
    }

    /// Return an item to the head of the queue without reordering, used
    /// when a dequeued item turns out not to be admissible yet.
    pub fn push_front(&self, item: QueueItem<T>) {
        self.items.lock().push_front(item);
    }

    /// Take up to `max` items from the head, preserving arrival order.
    pub fn pop_batch(&self, max: usize) -> Vec<QueueItem<T>> {
        let mut items = self.items.lock();
        let count = max.min(items.len());
        items.drain(..count).collect()
    }

    /// Remove every pending item (emergency stop).
    pub fn drain_all(&self) -> Vec<QueueItem<T>> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use futures::future::BoxFuture;

    fn item(tag: &'static str) -> (QueueItem<&'static str>, oneshot::Receiver<Result<&'static str, GovernorError>>) {
        let (tx, rx) = oneshot::channel();
        let call: Callable<&'static str> = Box::new(move || {
            let fut: BoxFuture<'static, Result<&'static str, ProviderError>> =
                Box::pin(async move { Ok(tag) });
            fut
        });
        (
            QueueItem {
                call,
                enqueued_at: Instant::now(),
                tx,
            },
            rx,
        )
    }

    #[test]
    fn preserves_arrival_order() {
        let queue = BoundedQueue::new(10, QueueFullPolicy::RejectNew);
        for tag in ["a", "b", "c"] {
            let (queued, _rx) = item(tag);
            assert!(queue.try_push(queued).is_ok());
        }

        let batch = queue.pop_batch(2);
        let tags: Vec<_> = batch
            .iter()
            .map(|queued| futures::executor::block_on((queued.call)()).unwrap())
            .collect();
        assert_eq!(tags, ["a", "b"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reject_new_leaves_length_unchanged() {
        let queue = BoundedQueue::new(2, QueueFullPolicy::RejectNew);
        for tag in ["a", "b"] {
            let (queued, _rx) = item(tag);
            assert!(queue.try_push(queued).is_ok());
        }

        let (overflow, _rx) = item("c");
        assert!(queue.try_push(overflow).is_err());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drop_oldest_settles_evicted_waiters() {
        let queue = BoundedQueue::new(2, QueueFullPolicy::DropOldest);
        let (first, mut first_rx) = item("a");
        assert!(queue.try_push(first).is_ok());
        let (second, _second_rx) = item("b");
        assert!(queue.try_push(second).is_ok());

        let (third, _third_rx) = item("c");
        assert!(queue.try_push(third).is_ok());

        assert_eq!(queue.len(), 2);
        match first_rx.try_recv().unwrap() {
            Err(GovernorError::QueueFull { capacity }) => assert_eq!(capacity, 2),
            other => panic!("expected eviction, got {other:?}"),
        }
    }

    #[test]
    fn push_front_keeps_the_item_next_in_line() {
        let queue = BoundedQueue::new(10, QueueFullPolicy::RejectNew);
        for tag in ["a", "b"] {
            let (queued, _rx) = item(tag);
            assert!(queue.try_push(queued).is_ok());
        }

        let mut batch = queue.pop_batch(1);
        let head = batch.pop().unwrap();
        queue.push_front(head);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let queue = BoundedQueue::new(10, QueueFullPolicy::RejectNew);
        for tag in ["a", "b", "c"] {
            let (queued, _rx) = item(tag);
            assert!(queue.try_push(queued).is_ok());
        }

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 3);
        assert!(queue.is_empty());
    }
}
