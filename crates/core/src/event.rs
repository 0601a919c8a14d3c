//! Event emission: decoupled notification between components and the UI.
//!
//! Each component owns one [`EventEmitter`] for its event type. Listeners
//! registered with [`EventEmitter::on`] are called synchronously, in
//! subscription order; a panicking listener is logged and skipped so the
//! remaining listeners still receive the event. Async consumers can
//! additionally [`subscribe`](EventEmitter::subscribe) to a broadcast
//! channel.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// Handle returned by [`EventEmitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered observer list plus a broadcast channel for one event type.
pub struct EventEmitter<E> {
    listeners: RwLock<Vec<(SubscriptionId, Listener<E>)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<Arc<E>>,
}

impl<E: Send + Sync + 'static> EventEmitter<E> {
    /// Create an emitter whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a synchronous listener.
    pub fn on<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() < before
    }

    /// Deliver an event to every listener, then to broadcast subscribers.
    pub fn emit(&self, event: E) {
        // Snapshot so listeners can (un)subscribe while being called.
        let listeners: Vec<(SubscriptionId, Listener<E>)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                warn!(
                    subscription = id.0,
                    error = %panic_message(panic.as_ref()),
                    "Event listener panicked, continuing delivery"
                );
            }
        }

        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events asynchronously.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<E>> {
        self.sender.subscribe()
    }

    /// Number of synchronous listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every synchronous listener.
    pub fn clear(&self) {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl<E: Send + Sync + 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new(256)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    #[test]
    fn listeners_receive_in_subscription_order() {
        let emitter = EventEmitter::<Ping>::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            emitter.on(move |e: &Ping| seen.lock().unwrap().push((tag, e.0)));
        }

        emitter.emit(Ping(7));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let emitter = EventEmitter::<Ping>::new(16);
        let delivered = Arc::new(Mutex::new(0));

        emitter.on(|_| panic!("listener exploded"));
        let d = delivered.clone();
        emitter.on(move |_| *d.lock().unwrap() += 1);

        emitter.emit(Ping(1));
        emitter.emit(Ping(2));
        assert_eq!(*delivered.lock().unwrap(), 2);
    }

    #[test]
    fn off_removes_listener() {
        let emitter = EventEmitter::<Ping>::new(16);
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = emitter.on(move |_| *c.lock().unwrap() += 1);

        emitter.emit(Ping(1));
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        emitter.emit(Ping(2));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_subscribers_see_events() {
        let emitter = EventEmitter::<Ping>::new(16);
        let mut rx = emitter.subscribe();
        emitter.emit(Ping(42));
        let event = rx.recv().await.unwrap();
        assert_eq!(*event, Ping(42));
    }

    #[test]
    fn emit_without_subscribers_doesnt_panic() {
        let emitter = EventEmitter::<Ping>::default();
        emitter.emit(Ping(0));
    }
}
