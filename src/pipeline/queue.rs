//! Fixed-capacity work queue shared by one crawler and N consumers.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::time::Duration;

use crate::WorkItem;

/// Bounded FIFO over a crossbeam channel. Holds both ends, so it never disconnects while alive.
#[derive(Clone, Debug)]
pub struct BoundedQueue {
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
    capacity: usize,
}

impl BoundedQueue {
    /// Capacity is `max(configured, num_consumers)` so every consumer can get its poison.
    pub fn new(configured: usize, num_consumers: usize) -> Self {
        let capacity = configured.max(num_consumers).max(1);
        let (tx, rx) = bounded::<WorkItem>(capacity);
        Self { tx, rx, capacity }
    }

    /// Offer `item`, waiting at most `timeout` for space. Hands the item back when full.
    pub fn try_push(&self, item: WorkItem, timeout: Duration) -> Result<(), WorkItem> {
        self.tx.send_timeout(item, timeout).map_err(|e| e.into_inner())
    }

    /// Take the next item, waiting at most `timeout`.
    pub fn try_pop(&self, timeout: Duration) -> Option<WorkItem> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Empty the queue without waiting. Returns how many real resources (not poison) it held.
    pub fn drain_resources(&self) -> usize {
        self.rx
            .try_iter()
            .filter(|item| matches!(item, WorkItem::Resource(_)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
