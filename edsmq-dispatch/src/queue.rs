use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Unbounded FIFO with a blocking async `get` and an atomic `clear`.
///
/// `put` never blocks and may be called from any thread. `clear` removes
/// every pending item under one lock; items put afterwards are kept.
#[derive(Debug)]
pub struct ClearableQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Default for ClearableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClearableQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn put(&self, item: T) {
        self.lock().push_back(item);
        self.available.notify_one();
    }

    /// Waits until an item is available and removes it.
    ///
    /// Cancel-safe: an item is only taken on the poll that returns it.
    pub async fn get(&self) -> T {
        loop {
            if let Some(item) = self.try_get() {
                return item;
            }
            self.available.notified().await;
        }
    }

    pub fn try_get(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Drops every pending item and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
