//! Thread-safe single-slot value with change subscriptions.

use crate::notifier::{notifier, Listener, Notifier};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Holds one value of type `T` and notifies subscribers on every `set`.
///
/// Subscribers are notified even when the new value equals the old one.
/// Notifications coalesce: a slow subscriber sees one wakeup for any number
/// of intervening updates and reads the latest value with [`Value::get`].
pub struct Value<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Vec<(u64, Notifier)>>,
    next_id: AtomicU64,
}

/// Cancels a [`Value::subscribe`] registration. Cancelling closes the
/// subscription's listener. Dropping the handle without cancelling keeps
/// the subscription alive for as long as the value lives.
pub struct Subscription<T> {
    id: u64,
    inner: Weak<Inner<T>>,
}

impl<T> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Value<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Value<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the stored value and wake every subscriber.
    pub fn set(&self, value: T) {
        {
            let mut slot = self.inner.value.write().unwrap_or_else(|e| e.into_inner());
            *slot = value;
        }
        // Snapshot the notifiers so no lock is held while signalling.
        let subscribers: Vec<Notifier> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, n)| n.clone())
            .collect();
        for n in subscribers {
            n.notify();
        }
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let slot = self.inner.value.read().unwrap_or_else(|e| e.into_inner());
        f(&slot)
    }

    /// Register for change notifications.
    pub fn subscribe(&self) -> (Listener, Subscription<T>) {
        let (tx, rx) = notifier();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, tx));
        let sub = Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        };
        (rx, sub)
    }
}

impl<T: Clone> Value<T> {
    pub fn get(&self) -> T {
        self.with(T::clone)
    }
}

impl<T> Subscription<T> {
    /// Stop receiving notifications. The associated listener reports closed.
    pub fn cancel(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|v| f.debug_tuple("Value").field(v).finish())
    }
}
