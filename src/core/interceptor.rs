//! Typed interceptor registration and dispatch.
//!
//! Events are a tagged union rather than a stringly-keyed map, so each
//! callback receives exactly the payload shape of the event it subscribed
//! to. Dispatch is synchronous and runs callbacks in registration order.

use std::panic::{AssertUnwindSafe, catch_unwind};

use sonic_rs::Value;
use tracing::warn;

use super::types::CloseEvent;

/// Lifecycle and message events observable through interceptors.
#[derive(Debug)]
pub enum WsEvent {
    /// Connection reached the open state.
    Open { url: String },
    /// Connection closed (clean or abnormal).
    Close(CloseEvent),
    /// Transport-level failure; the subsequent close drives recovery.
    Error { message: String },
    /// Unsolicited inbound message (no correlation id).
    Message { data: Value },
    /// Outbound payload was written to the wire.
    Send { data: Value },
    /// Reconnection was enabled and the attempt budget is spent.
    Exhausted { attempts: u32 },
}

/// Registration key for [`WsEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEventKind {
    Open,
    Close,
    Error,
    Message,
    Send,
    Exhausted,
}

impl WsEvent {
    pub fn kind(&self) -> WsEventKind {
        match self {
            WsEvent::Open { .. } => WsEventKind::Open,
            WsEvent::Close(_) => WsEventKind::Close,
            WsEvent::Error { .. } => WsEventKind::Error,
            WsEvent::Message { .. } => WsEventKind::Message,
            WsEvent::Send { .. } => WsEventKind::Send,
            WsEvent::Exhausted { .. } => WsEventKind::Exhausted,
        }
    }
}

/// Handle returned by [`InterceptorRegistry::on`], used for removal.
pub type InterceptorId = u64;

type Callback = Box<dyn Fn(&WsEvent) + Send + Sync>;

/// Ordered per-event callback lists.
#[derive(Default)]
pub struct InterceptorRegistry {
    next_id: InterceptorId,
    slots: Vec<(WsEventKind, InterceptorId, Callback)>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the list for `kind`; the returned id removes it.
    pub fn on(&mut self, kind: WsEventKind, callback: Callback) -> InterceptorId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push((kind, id, callback));
        id
    }

    /// Remove the callback registered under `id`; no-op when absent.
    pub fn off(&mut self, kind: WsEventKind, id: InterceptorId) -> bool {
        let before = self.slots.len();
        self.slots
            .retain(|(k, slot_id, _)| !(*k == kind && *slot_id == id));
        self.slots.len() != before
    }

    /// Invoke every callback registered for the event's kind, in
    /// registration order. A panicking callback is isolated so the
    /// remaining callbacks still run.
    pub fn dispatch(&self, event: &WsEvent) {
        let kind = event.kind();
        for (slot_kind, id, callback) in &self.slots {
            if *slot_kind != kind {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(event = ?kind, interceptor = id, "interceptor panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn open_event() -> WsEvent {
        WsEvent::Open {
            url: "ws://test".to_string(),
        }
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InterceptorRegistry::new();

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            registry.on(
                WsEventKind::Open,
                Box::new(move |_| order.lock().unwrap().push(tag)),
            );
        }

        registry.dispatch(&open_event());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn off_removes_only_the_named_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = InterceptorRegistry::new();

        let keep = hits.clone();
        registry.on(
            WsEventKind::Open,
            Box::new(move |_| {
                keep.fetch_add(1, Ordering::Relaxed);
            }),
        );
        let dropped = hits.clone();
        let id = registry.on(
            WsEventKind::Open,
            Box::new(move |_| {
                dropped.fetch_add(100, Ordering::Relaxed);
            }),
        );

        assert!(registry.off(WsEventKind::Open, id));
        assert!(!registry.off(WsEventKind::Open, id));

        registry.dispatch(&open_event());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = InterceptorRegistry::new();
        let counter = hits.clone();
        registry.on(
            WsEventKind::Message,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        registry.dispatch(&open_event());
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        registry.dispatch(&WsEvent::Message {
            data: Value::default(),
        });
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_callback_does_not_block_later_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = InterceptorRegistry::new();

        registry.on(WsEventKind::Open, Box::new(|_| panic!("boom")));
        let counter = hits.clone();
        registry.on(
            WsEventKind::Open,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        registry.dispatch(&open_event());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
