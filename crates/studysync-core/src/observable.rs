//! LiveValue - 単一の現在値 + listener 集合
//!
//! - 値は `Arc<T>` で丸ごと差し替える（in-place 変更はしない）
//! - `observe` した瞬間に現在値が 1 回届き、以降は publish のたびに届く
//! - listener はロックの外で呼ぶ。publish 同士は直列化されるので、
//!   listener は値を publish された順に受け取る
//! - async 側からは `subscribe()` の watch receiver でも待てる

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

type Listener<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

struct Listeners<T> {
    next_id: u64,
    entries: BTreeMap<ListenerId, Listener<T>>,
}

impl<T> Listeners<T> {
    fn allocate(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Observable single value.
///
/// Listeners must not call `publish` on the same value (publications are
/// serialised by a non-reentrant lock).
pub struct LiveValue<T> {
    tx: watch::Sender<Arc<T>>,
    listeners: Mutex<Listeners<T>>,
    delivery: Mutex<()>,
}

fn relock<G>(result: Result<G, PoisonError<G>>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + Sync + 'static> LiveValue<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            tx,
            listeners: Mutex::new(Listeners {
                next_id: 0,
                entries: BTreeMap::new(),
            }),
            delivery: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.tx.borrow())
    }

    /// Register a listener. It is called right away with the current value.
    pub fn observe(&self, listener: impl Fn(&Arc<T>) + Send + Sync + 'static) -> ListenerId {
        let listener: Listener<T> = Arc::new(listener);
        let _delivery = self.delivery_guard();
        let id = {
            let mut listeners = relock(self.listeners.lock());
            let id = listeners.allocate();
            listeners.entries.insert(id, Arc::clone(&listener));
            id
        };
        listener(&self.get());
        id
    }

    /// Returns whether the listener was registered.
    pub fn unobserve(&self, id: ListenerId) -> bool {
        relock(self.listeners.lock()).entries.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        relock(self.listeners.lock()).entries.len()
    }

    pub fn publish(&self, value: T) {
        let _delivery = self.delivery_guard();
        let value = Arc::new(value);
        self.tx.send_replace(Arc::clone(&value));
        self.deliver(&value);
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.tx.subscribe()
    }

    fn delivery_guard(&self) -> MutexGuard<'_, ()> {
        relock(self.delivery.lock())
    }

    fn deliver(&self, value: &Arc<T>) {
        let snapshot: Vec<Listener<T>> =
            relock(self.listeners.lock()).entries.values().cloned().collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

impl<T: PartialEq + Send + Sync + 'static> LiveValue<T> {
    /// Publish only when the value differs from the current one.
    /// Returns whether anything was published.
    pub fn publish_if_changed(&self, value: T) -> bool {
        let _delivery = self.delivery_guard();
        if *self.get() == value {
            return false;
        }
        let value = Arc::new(value);
        self.tx.send_replace(Arc::clone(&value));
        self.deliver(&value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&Arc<i32>) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &Arc<i32>| sink.lock().unwrap().push(**v))
    }

    #[test]
    fn observer_gets_current_value_then_changes() {
        let live = LiveValue::new(1);
        let (seen, listener) = recorder();
        live.observe(listener);

        live.publish(2);
        live.publish(3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*live.get(), 3);
    }

    #[test]
    fn unchanged_value_is_not_republished() {
        let live = LiveValue::new(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        live.observe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!live.publish_if_changed(5));
        assert!(live.publish_if_changed(6));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unobserved_listener_stops_receiving() {
        let live = LiveValue::new(0);
        let (seen, listener) = recorder();
        let id = live.observe(listener);
        assert!(live.unobserve(id));
        assert!(!live.unobserve(id));

        live.publish(1);
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(live.listener_count(), 0);
    }

    #[test]
    fn listener_may_read_the_value_without_deadlock() {
        let live = Arc::new(LiveValue::new(0));
        let inner = Arc::clone(&live);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        live.observe(move |v| {
            assert_eq!(**v, *inner.get());
            s.fetch_add(1, Ordering::SeqCst);
        });
        live.publish(7);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_subscribers_are_woken() {
        let live = LiveValue::new(String::from("a"));
        let mut rx = live.subscribe();
        live.publish("b".to_string());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_str(), "b");
    }
}
