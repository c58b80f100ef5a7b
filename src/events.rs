//! Synchronous, in-process event subscription registry.
//!
//! The source relied on an observer idiom (`EventEmitter`-style) for job and
//! backtest lifecycle notifications. Here that becomes an explicit registry
//! keyed by event name, holding a list of handler callables per name plus a
//! wildcard bucket for subscribers that want every event. Delivery is
//! synchronous and in order of subscription; a subscriber that blocks blocks
//! the emitter, so handlers are expected to be cheap (record, log, forward
//! to a channel).

use std::collections::HashMap;
use std::sync::Mutex;

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Subscribes handlers to named events of type `E` and delivers them
/// synchronously, in subscription order.
pub struct EventEmitter<E> {
    handlers: Mutex<HashMap<&'static str, Vec<Handler<E>>>>,
    wildcard: Mutex<Vec<Handler<E>>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            wildcard: Mutex::new(Vec::new()),
        }
    }
}

impl<E> EventEmitter<E> {
    /// Create an emitter with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a specific named event.
    pub fn on(&self, name: &'static str, handler: impl Fn(&E) + Send + Sync + 'static) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name)
            .or_default()
            .push(Box::new(handler));
    }

    /// Subscribe to every event this emitter delivers.
    pub fn on_any(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        self.wildcard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(handler));
    }

    /// Emit `event` under `name` to every matching subscriber.
    ///
    /// Named subscribers run first, in subscription order, followed by
    /// wildcard subscribers. Must not be called while holding a lock the
    /// handlers might need — handlers run inline on the caller's stack.
    pub fn emit(&self, name: &'static str, event: &E) {
        if let Some(list) = self.handlers.lock().unwrap_or_else(|e| e.into_inner()).get(name) {
            for handler in list {
                handler(event);
            }
        }
        for handler in self.wildcard.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            handler(event);
        }
    }

    /// Number of subscribers registered for `name` (wildcard excluded).
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn delivers_to_named_subscribers_only() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        emitter.on("added", move |v| {
            seen2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        emitter.emit("added", &3);
        emitter.emit("completed", &100); // not subscribed, ignored

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn wildcard_subscribers_see_every_event() {
        let emitter: EventEmitter<&'static str> = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        emitter.on_any(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("added", &"job-1");
        emitter.emit("completed", &"job-1");

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscriber_count_reports_named_subscribers() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        assert_eq!(emitter.subscriber_count("added"), 0);
        emitter.on("added", |_| {});
        emitter.on("added", |_| {});
        assert_eq!(emitter.subscriber_count("added"), 2);
    }
}
