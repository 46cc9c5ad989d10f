//! Observable state store.
//!
//! Published state (connection state, discovered devices, correlated
//! windows) lives in a [`StateStore`]. Readers get a consistent clone,
//! writers replace or update the value atomically, and every change is
//! pushed to subscribers in the order it was applied.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Watcher<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Subscriber<T> {
    Channel(Sender<T>),
    Callback(Watcher<T>),
}

struct Inner<T> {
    value: RwLock<T>,
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

/// A shared value with atomic get/set and change subscription.
///
/// Cloning the store yields another handle to the same value.
pub struct StateStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for StateStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StateStore<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(value),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the value and notify subscribers.
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// Replace the value only if it differs from the current one.
    ///
    /// Returns `true` when a change was published.
    pub fn set_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let mut guard = self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *guard == value {
            return false;
        }
        *guard = value;
        self.publish(&guard);
        true
    }

    /// Mutate the value in place and notify subscribers.
    ///
    /// The write lock is held while subscribers are notified, so observers
    /// receive changes in exactly the order they were applied.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self
            .inner
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut guard);
        self.publish(&guard);
        result
    }

    /// Subscribe to future changes through a channel.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.lock_subscribers().push(Subscriber::Channel(tx));
        rx
    }

    /// Register a callback invoked with every new value.
    ///
    /// Callbacks run on the writer's thread and must not write back into
    /// this same store.
    pub fn watch(&self, f: impl Fn(&T) + Send + Sync + 'static) {
        self.lock_subscribers()
            .push(Subscriber::Callback(Arc::new(f)));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn publish(&self, value: &T) {
        // Dropped receivers are pruned here.
        self.lock_subscribers().retain(|sub| match sub {
            Subscriber::Channel(tx) => tx.send(value.clone()).is_ok(),
            Subscriber::Callback(f) => {
                f(value);
                true
            }
        });
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber<T>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for StateStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + std::fmt::Debug + Send + Sync + 'static> std::fmt::Debug for StateStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateStore").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_set() {
        let store = StateStore::new(1u32);
        store.set(5);
        assert_eq!(store.get(), 5);
    }

    #[test]
    fn test_subscribers_see_every_change_in_order() {
        let store = StateStore::new(Vec::<u32>::new());
        let rx = store.subscribe();

        store.update(|v| v.push(1));
        store.update(|v| v.push(2));

        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_if_changed_skips_duplicates() {
        let store = StateStore::new(false);
        let rx = store.subscribe();

        assert!(!store.set_if_changed(false));
        assert!(store.set_if_changed(true));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let store = StateStore::new(0u8);
        let rx = store.subscribe();
        assert_eq!(store.subscriber_count(), 1);

        drop(rx);
        store.set(1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_watch_callback() {
        let store = StateStore::new(0u8);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        store.watch(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        store.set(3);
        store.set(4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
